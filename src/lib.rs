//! Session core for chromatography campaigns.
//!
//! One process keeps one [`campaign::Campaign`] in a [`state::StateStore`],
//! caches uploads in a [`cache::FileCache`], rebuilds the campaign from the
//! edited sample table with [`builder::CampaignBuilder`], runs the analysis
//! in the background through [`orchestrator::ProcessingOrchestrator`] and
//! moves campaigns in and out with [`codec::PersistenceCodec`].

pub mod builder;
pub mod cache;
pub mod campaign;
pub mod codec;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod output;
pub mod parser;
pub mod session;
pub mod settings;
pub mod state;
