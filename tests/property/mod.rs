//! Property-based tests for resumable runs
