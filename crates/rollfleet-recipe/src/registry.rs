//! Explicit application → recipe mapping.
//!
//! Populated once at startup and passed into the orchestrator; there
//! is no dynamic lookup.

use std::collections::HashMap;
use std::sync::Arc;

use crate::recipe::Recipe;

/// The set of recipes known to this process.
#[derive(Default, Clone)]
pub struct RecipeRegistry {
    recipes: HashMap<String, Arc<dyn Recipe>>,
}

impl RecipeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a recipe under its own name, replacing any previous
    /// registration.
    pub fn register(&mut self, recipe: Arc<dyn Recipe>) {
        self.recipes.insert(recipe.name().to_string(), recipe);
    }

    pub fn get(&self, app: &str) -> Option<Arc<dyn Recipe>> {
        self.recipes.get(app).cloned()
    }

    /// Registered application names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.recipes.keys().cloned().collect();
        names.sort();
        names
    }
}
