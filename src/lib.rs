//! Image AI Renamer
//!
//! Titles images with a Gemini vision model and copies them under the
//! generated names, or searches a folder for images matching a description.
//! Requests are spread over a pool of API keys with per-key pacing and
//! rotation on quota errors.

pub mod batch;
pub mod config;
pub mod models;
pub mod services;
