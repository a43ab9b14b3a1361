//! The endpoints of the shop under test and their selection weights.
//!
//! The collection reads that fan out to other services per item carry the highest weights, since
//! they are the point of the test. Baseline reads without inter-service calls serve as reference,
//! while create calls and the two shopping flows keep the data set moving.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Result, bail};
use fanout_engine::{Behavior, Request, Scenario, TaskCatalog, TaskContext};
use rand::Rng;
use serde_json::json;

/// A default entry of the catalog.
#[derive(Clone, Copy, Debug)]
pub struct Task {
    /// The operation name.
    pub name: &'static str,
    /// The selection weight unless overridden.
    pub weight: u32,
    /// What the task does.
    pub behavior: Behavior,
    /// Responses slower than this are logged.
    pub slow: Option<Duration>,
}

const fn task(name: &'static str, weight: u32, behavior: Behavior) -> Task {
    Task {
        name,
        weight,
        behavior,
        slow: None,
    }
}

const fn slow_task(name: &'static str, weight: u32, behavior: Behavior, slow_ms: u64) -> Task {
    Task {
        name,
        weight,
        behavior,
        slow: Some(Duration::from_millis(slow_ms)),
    }
}

/// All tasks with their default weights.
pub const TASKS: &[Task] = &[
    slow_task("[N+1] GET All Carts", 50, Behavior::Request(list_carts), 2_000),
    slow_task(
        "[N+1 NESTED] GET All Payments",
        40,
        Behavior::Request(list_payments),
        3_000,
    ),
    slow_task(
        "[N+1 DUAL] GET All Shippings",
        35,
        Behavior::Request(list_shippings),
        3_000,
    ),
    slow_task(
        "[N+1 DUAL] GET All Favourites",
        30,
        Behavior::Request(list_favourites),
        2_500,
    ),
    task("[BASELINE] GET All Users", 20, Behavior::Request(list_users)),
    task("[BASELINE] GET All Products", 20, Behavior::Request(list_products)),
    slow_task(
        "[POTENTIAL N+1] GET All Orders",
        15,
        Behavior::Request(list_orders),
        2_000,
    ),
    task(
        "[BASELINE] GET All Categories",
        10,
        Behavior::Request(list_categories),
    ),
    task("[CREATE] POST User", 5, Behavior::Request(create_user)),
    task("[CREATE] POST Category", 3, Behavior::Request(create_category)),
    task("[CREATE] POST Product", 4, Behavior::Request(create_product)),
    task("[CREATE] POST Cart", 3, Behavior::Request(create_cart)),
    task("[FLOW] Purchase", 2, Behavior::Flow(Scenario::Purchase)),
    task("[FLOW] Abandonment", 1, Behavior::Flow(Scenario::Abandonment)),
];

/// Builds the catalog, applying weight overrides by task name.
///
/// An override of zero removes the task. Overrides for unknown tasks are rejected.
pub fn build(overrides: &BTreeMap<String, u32>) -> Result<TaskCatalog> {
    if let Some(unknown) = overrides
        .keys()
        .find(|name| !TASKS.iter().any(|task| task.name == name.as_str()))
    {
        bail!("weight override for unknown task `{unknown}`");
    }

    let mut builder = TaskCatalog::builder();
    for task in TASKS {
        let weight = overrides.get(task.name).copied().unwrap_or(task.weight);
        if weight == 0 {
            tracing::debug!(task = task.name, "task disabled");
            continue;
        }

        let entry = builder.register(task.name, weight, task.behavior)?;
        if let Some(slow) = task.slow {
            entry.slow_threshold(slow);
        }
    }

    Ok(builder.build()?)
}

fn list_carts(_cx: &mut TaskContext<'_>) -> Request {
    Request::get("/order-service/api/carts")
}

fn list_payments(_cx: &mut TaskContext<'_>) -> Request {
    Request::get("/payment-service/api/payments")
}

fn list_shippings(_cx: &mut TaskContext<'_>) -> Request {
    Request::get("/shipping-service/api/shippings")
}

fn list_favourites(_cx: &mut TaskContext<'_>) -> Request {
    Request::get("/favourite-service/api/favourites")
}

fn list_users(_cx: &mut TaskContext<'_>) -> Request {
    Request::get("/user-service/api/users")
}

fn list_products(_cx: &mut TaskContext<'_>) -> Request {
    Request::get("/product-service/api/products")
}

fn list_orders(_cx: &mut TaskContext<'_>) -> Request {
    Request::get("/order-service/api/orders")
}

fn list_categories(_cx: &mut TaskContext<'_>) -> Request {
    Request::get("/product-service/api/categories")
}

fn create_user(cx: &mut TaskContext<'_>) -> Request {
    let phone: u64 = cx.rng.random_range(2_000_000_000..3_000_000_000);
    Request::post(
        "/user-service/api/users",
        json!({
            "firstName": format!("Load{}", cx.ids.timestamp()),
            "lastName": "Test",
            "email": cx.ids.unique_email(),
            "phone": format!("+1{phone}"),
            "imageUrl": "https://via.placeholder.com/150",
        }),
    )
}

fn create_category(cx: &mut TaskContext<'_>) -> Request {
    Request::post(
        "/product-service/api/categories",
        json!({
            "categoryTitle": format!("LoadTest_{}", cx.ids.timestamp()),
            "imageUrl": "https://via.placeholder.com/300",
        }),
    )
}

fn create_product(cx: &mut TaskContext<'_>) -> Request {
    let cents: u32 = cx.rng.random_range(1_000..=50_000);
    let quantity: u32 = cx.rng.random_range(10..=1_000);
    Request::post(
        "/product-service/api/products",
        json!({
            "productTitle": format!("LoadTest Product {}", cx.ids.timestamp()),
            "imageUrl": "https://via.placeholder.com/400",
            "sku": cx.ids.unique_sku(),
            "priceUnit": f64::from(cents) / 100.0,
            "quantity": quantity,
            // Seed data: category 1 always exists.
            "category": { "categoryId": 1 },
        }),
    )
}

fn create_cart(_cx: &mut TaskContext<'_>) -> Request {
    // Seed data: user 1 always exists.
    Request::post("/order-service/api/carts", json!({ "userId": 1 }))
}

#[cfg(test)]
mod tests {
    use fanout_engine::{CatalogError, IdentityGenerator, Method};
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    use super::*;

    #[test]
    fn default_weights() {
        let catalog = build(&BTreeMap::new()).unwrap();

        assert_eq!(catalog.entries().len(), TASKS.len());
        assert_eq!(catalog.total_weight(), 238);

        let carts = catalog.probability("[N+1] GET All Carts").unwrap();
        assert!((carts - 50.0 / 238.0).abs() < 1e-12);

        let thresholds: Vec<_> = catalog
            .entries()
            .iter()
            .filter_map(|entry| Some((entry.name(), entry.threshold()?)))
            .collect();
        assert_eq!(thresholds.len(), 5);
        assert!(thresholds.contains(&(
            "[N+1 DUAL] GET All Favourites",
            Duration::from_millis(2_500)
        )));
    }

    #[test]
    fn overrides() {
        let overrides = BTreeMap::from([
            ("[CREATE] POST Cart".to_owned(), 0),
            ("[FLOW] Purchase".to_owned(), 9),
        ]);
        let catalog = build(&overrides).unwrap();

        assert_eq!(catalog.entries().len(), TASKS.len() - 1);
        assert_eq!(catalog.probability("[CREATE] POST Cart"), None);
        assert_eq!(catalog.total_weight(), 238 - 3 - 2 + 9);
    }

    #[test]
    fn rejects_unknown_override() {
        let overrides = BTreeMap::from([("GET Something".to_owned(), 3)]);
        let error = build(&overrides).unwrap_err();
        assert!(error.to_string().contains("GET Something"));
    }

    #[test]
    fn rejects_disabling_everything() {
        let overrides: BTreeMap<String, u32> = TASKS
            .iter()
            .map(|task| (task.name.to_owned(), 0))
            .collect();
        let error = build(&overrides).unwrap_err();
        assert!(matches!(
            error.downcast_ref::<CatalogError>(),
            Some(CatalogError::Empty)
        ));
    }

    #[test]
    fn create_payloads_are_unique() {
        let ids = IdentityGenerator::with_base(1_000);
        let mut rng = SmallRng::seed_from_u64(7);
        let mut cx = TaskContext {
            rng: &mut rng,
            ids: &ids,
        };

        let first = create_user(&mut cx);
        let second = create_user(&mut cx);
        assert_eq!(first.method, Method::Post);
        assert_eq!(first.path, "/user-service/api/users");

        let email = |request: &Request| request.body.as_ref().unwrap()["email"].clone();
        assert_ne!(email(&first), email(&second));

        let phone = first.body.as_ref().unwrap()["phone"].as_str().unwrap().to_owned();
        assert!(phone.starts_with("+12"));
        assert_eq!(phone.len(), 12);

        let product = create_product(&mut cx);
        let body = product.body.unwrap();
        assert!(body["sku"].as_str().unwrap().starts_with("SKU-"));
        let price = body["priceUnit"].as_f64().unwrap();
        assert!((10.0..=500.0).contains(&price));
        let quantity = body["quantity"].as_u64().unwrap();
        assert!((10..=1_000).contains(&quantity));
    }
}
