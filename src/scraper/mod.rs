pub mod browser;
pub mod chrome;
pub mod extractor;
pub mod fingerprint;
pub mod itf;
pub mod runner;
pub mod sites;

#[cfg(test)]
pub(crate) mod fake;
