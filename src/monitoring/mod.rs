pub mod progress_log;
