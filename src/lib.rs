pub mod cli;
pub mod gateway;
pub mod io;
pub mod logging;
pub mod lsp;
pub mod router;

#[cfg(test)]
mod test_utils;
