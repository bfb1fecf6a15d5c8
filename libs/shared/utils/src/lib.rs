pub mod extractor;
pub mod jwt;
pub mod schedule;
pub mod test_utils;
pub mod validation;
