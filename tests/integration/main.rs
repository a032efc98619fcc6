//! Integration tests: full season flows against both store backends.

mod mock_valuation;
mod season;
mod valuation;
