pub mod authenticated;
pub mod public;

#[cfg(test)]
mod tests;
