pub mod backend;
pub mod key;
pub mod recipes;

pub use backend::{
    ActiveSession, BackendLauncher, BackendRouter, Dispatched, OutboundCall, ProcessLauncher, RouterError,
    RouterEvent, SelectOutcome,
};
pub use key::ProjectKey;
pub use recipes::{RecipeBook, RecipeConfig, RecipeOverrides, SpawnRecipe};
