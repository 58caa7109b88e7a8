//! Simulated storefront: catalog, cart and favorites. Every user action
//! goes through `EventTracker::record`.

use std::collections::BTreeSet;

use shopvn_analytics::{CartLine, EventPayload, EventTracker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Product {
    pub id: u32,
    pub name: &'static str,
    pub category: &'static str,
    /// VND.
    pub price: u64,
}

const fn product(id: u32, name: &'static str, category: &'static str, price: u64) -> Product {
    Product {
        id,
        name,
        category,
        price,
    }
}

pub const CATALOG: [Product; 12] = [
    product(1, "iPhone 15 Pro Max", "Điện thoại", 29_990_000),
    product(2, "Samsung Galaxy S24", "Điện thoại", 22_990_000),
    product(3, "MacBook Pro M3", "Laptop", 45_990_000),
    product(4, "AirPods Pro 2", "Âm thanh", 6_490_000),
    product(5, "Apple Watch Ultra", "Đồng hồ", 21_990_000),
    product(6, "iPad Pro 12.9\"", "Máy tính bảng", 32_990_000),
    product(7, "Sony WH-1000XM5", "Âm thanh", 8_990_000),
    product(8, "Dell XPS 15", "Laptop", 38_990_000),
    product(9, "Canon EOS R6", "Máy ảnh", 54_990_000),
    product(10, "Nintendo Switch", "Gaming", 7_990_000),
    product(11, "Xiaomi Mi Band 8", "Đồng hồ", 990_000),
    product(12, "Logitech MX Master 3", "Phụ kiện", 2_490_000),
];

/// Category label that clears the filter.
pub const ALL_CATEGORIES: &str = "Tất cả";

pub fn find_product(id: u32) -> Option<&'static Product> {
    CATALOG.iter().find(|p| p.id == id)
}

/// Distinct categories in catalog order.
pub fn categories() -> Vec<&'static str> {
    let mut seen = Vec::new();
    for p in &CATALOG {
        if !seen.contains(&p.category) {
            seen.push(p.category);
        }
    }
    seen
}

fn lookup(id: u32) -> anyhow::Result<&'static Product> {
    find_product(id).ok_or_else(|| anyhow::anyhow!("no product with id {id}"))
}

/// UI state for one session.
pub struct Storefront<'a> {
    tracker: &'a EventTracker,
    cart: Vec<CartLine>,
    favorites: BTreeSet<u32>,
    category: Option<String>,
}

impl<'a> Storefront<'a> {
    pub fn new(tracker: &'a EventTracker) -> Self {
        Self {
            tracker,
            cart: Vec::new(),
            favorites: BTreeSet::new(),
            category: None,
        }
    }

    pub fn view_product(&mut self, id: u32) -> anyhow::Result<&'static Product> {
        let p = lookup(id)?;
        self.tracker.record(EventPayload::ProductView {
            product_id: p.id,
            product_name: p.name.to_string(),
            category: p.category.to_string(),
            price: p.price,
        });
        Ok(p)
    }

    /// Case-insensitive name match. Returns the matches visible under the
    /// active category filter; `resultsCount` counts the whole catalog. An
    /// empty query records nothing.
    pub fn search(&mut self, query: &str) -> Vec<&'static Product> {
        let needle = query.to_lowercase();
        let matches = |p: &&'static Product| p.name.to_lowercase().contains(&needle);
        if !query.is_empty() {
            self.tracker.record(EventPayload::Search {
                query: query.to_string(),
                results_count: CATALOG.iter().filter(matches).count(),
            });
        }
        self.visible().filter(matches).collect()
    }

    /// Select a category, or [`ALL_CATEGORIES`] to clear the filter.
    pub fn filter_category(&mut self, category: &str) -> Vec<&'static Product> {
        self.category = (category != ALL_CATEGORIES).then(|| category.to_string());
        self.tracker.record(EventPayload::CategoryFilter {
            category: category.to_string(),
        });
        self.visible().collect()
    }

    fn visible(&self) -> impl Iterator<Item = &'static Product> + '_ {
        CATALOG
            .iter()
            .filter(move |p| self.category.as_deref().map_or(true, |c| p.category == c))
    }

    pub fn add_to_cart(&mut self, id: u32) -> anyhow::Result<u32> {
        let p = lookup(id)?;
        let quantity = match self.cart.iter_mut().find(|line| line.product_id == id) {
            Some(line) => {
                line.quantity += 1;
                line.quantity
            }
            None => {
                self.cart.push(CartLine {
                    product_id: p.id,
                    product_name: p.name.to_string(),
                    category: p.category.to_string(),
                    price: p.price,
                    quantity: 1,
                });
                1
            }
        };
        self.tracker.record(EventPayload::AddToCart {
            product_id: p.id,
            product_name: p.name.to_string(),
            price: p.price,
            category: p.category.to_string(),
        });
        Ok(quantity)
    }

    /// Returns whether the product is a favorite afterwards.
    pub fn toggle_favorite(&mut self, id: u32) -> anyhow::Result<bool> {
        let p = lookup(id)?;
        if self.favorites.remove(&id) {
            self.tracker.record(EventPayload::RemoveFavorite {
                product_id: p.id,
                product_name: p.name.to_string(),
            });
            Ok(false)
        } else {
            self.favorites.insert(id);
            self.tracker.record(EventPayload::AddFavorite {
                product_id: p.id,
                product_name: p.name.to_string(),
                category: p.category.to_string(),
            });
            Ok(true)
        }
    }

    pub fn cart(&self) -> &[CartLine] {
        &self.cart
    }

    pub fn cart_total(&self) -> u64 {
        self.cart.iter().map(|l| l.price * u64::from(l.quantity)).sum()
    }

    pub fn cart_count(&self) -> u32 {
        self.cart.iter().map(|l| l.quantity).sum()
    }

    pub fn favorites(&self) -> &BTreeSet<u32> {
        &self.favorites
    }

    /// Records `checkout_initiated` and returns the total. An empty cart
    /// records nothing.
    pub fn checkout(&mut self) -> Option<u64> {
        if self.cart.is_empty() {
            tracing::info!("checkout skipped, cart is empty");
            return None;
        }
        let total = self.cart_total();
        self.tracker.record(EventPayload::CheckoutInitiated {
            cart_items: self.cart.clone(),
            total,
            item_count: self.cart_count(),
        });
        Some(total)
    }
}
