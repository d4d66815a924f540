//! Authentication providers

pub mod ntlm;

pub use ntlm::{NtlmContext, NtlmOutcome, NtlmVersion};
