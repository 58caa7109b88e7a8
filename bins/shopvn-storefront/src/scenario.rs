//! Scripted shopper behaviour for `run`.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::storefront::{Storefront, ALL_CATEGORIES};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    View { product_id: u32 },
    Search { query: String },
    Filter { category: String },
    AddToCart { product_id: u32 },
    ToggleFavorite { product_id: u32 },
    Checkout,
    Pause { millis: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    pub actions: Vec<Action>,
}

impl Scenario {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("invalid scenario {}", path.display()))
    }

    /// A short browse-and-buy session.
    pub fn builtin() -> Self {
        use Action::*;
        Self {
            actions: vec![
                Search {
                    query: "iphone".into(),
                },
                View { product_id: 1 },
                ToggleFavorite { product_id: 1 },
                Filter {
                    category: "Laptop".into(),
                },
                View { product_id: 3 },
                View { product_id: 8 },
                AddToCart { product_id: 3 },
                Pause { millis: 200 },
                Filter {
                    category: ALL_CATEGORIES.into(),
                },
                Search {
                    query: "airpods".into(),
                },
                AddToCart { product_id: 4 },
                AddToCart { product_id: 4 },
                ToggleFavorite { product_id: 1 },
                Checkout,
            ],
        }
    }
}

/// Play every action in order. Unknown products are logged and skipped.
pub async fn play(store: &mut Storefront<'_>, scenario: &Scenario) -> usize {
    let mut performed = 0;
    for action in &scenario.actions {
        let result = match action {
            Action::View { product_id } => store.view_product(*product_id).map(|_| ()),
            Action::Search { query } => {
                store.search(query);
                Ok(())
            }
            Action::Filter { category } => {
                store.filter_category(category);
                Ok(())
            }
            Action::AddToCart { product_id } => store.add_to_cart(*product_id).map(|_| ()),
            Action::ToggleFavorite { product_id } => store.toggle_favorite(*product_id).map(|_| ()),
            Action::Checkout => {
                store.checkout();
                Ok(())
            }
            Action::Pause { millis } => {
                tokio::time::sleep(Duration::from_millis(*millis)).await;
                continue;
            }
        };
        match result {
            Ok(()) => performed += 1,
            Err(e) => tracing::warn!(?action, error = %e, "skipping action"),
        }
    }
    performed
}
