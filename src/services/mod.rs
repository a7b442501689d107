pub mod cancel;
pub mod credentials;
pub mod executor;
pub mod files;
pub mod gemini;
pub mod naming;
pub mod rate_limit;
pub mod vision;
