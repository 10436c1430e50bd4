//! Contract document extraction pipeline.
//!
//! Ingests folders of contract PDFs (frequently scanned and degraded)
//! and extracts structured fields with a local language model:
//! counterparty, address, country, contract type, signed date and
//! signature completeness, each with a calibrated confidence score and
//! review flag.

pub mod cache;
pub mod cli;
pub mod config;
pub mod knowledge;
pub mod llm;
pub mod models;
pub mod ocr;
pub mod pdf;
pub mod repository;
pub mod services;
pub mod text;
