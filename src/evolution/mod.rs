pub mod candidate;
pub mod executor;
pub mod method;
pub mod recipe;
pub mod result;
pub mod traits;

#[cfg(test)]
pub(crate) mod test_support;
