#![doc = "ocr-batch-core: core logic library for ocr-batch."]

//! This crate holds the data model, the provider adapter and the batch pipeline.
//! The CLI crate only parses arguments, loads configuration and wires these
//! pieces together.
//!
//! # Usage
//! Build a [`provider::BedrockAdapter`] (or any [`contract::InferenceProvider`]),
//! a [`dispatch::Dispatcher`] and an [`emit::OutputEmitter`], hand them to
//! [`batch::BatchOrchestrator::new`], then call `run_directory`.

pub mod batch;
pub mod config;
pub mod contract;
pub mod discovery;
pub mod dispatch;
pub mod emit;
pub mod pages;
pub mod prompts;
pub mod provider;
pub mod wire;
