//! Incremental log-tailing reporter for database server logs.
//!
//! The pipeline: [`config`] loads the run's settings, [`resolver`] expands
//! each configured file entry into concrete paths, [`reader`] opens and
//! reassembles multi-line records, [`filter`] drops what the run doesn't
//! care about, [`canonical`] abstracts literal values for clustering,
//! [`aggregate`] groups occurrences, and [`report`] renders the result for
//! [`mailer`] to deliver. [`run`] wires all of it together for `main.rs`.

pub mod aggregate;
pub mod canonical;
pub mod config;
pub mod csv_log;
pub mod error;
pub mod filter;
pub mod logging;
pub mod mailer;
pub mod prefix;
pub mod reader;
pub mod report;
pub mod resolver;
pub mod run;
