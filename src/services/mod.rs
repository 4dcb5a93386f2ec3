pub mod correlation;
pub mod crawler;
pub mod dashboard;
pub mod ingest;
pub mod parsing;
pub mod results_page;
pub mod stats;
pub mod weather;
