//! Reqwest-backed catalog client.
//!
//! Owns transport details only: URL layout, headers, timeout and status
//! mapping, and decoding the upstream camelCase JSON into domain snapshots.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::{FetchClient, FetchError};
use crate::domain::{Category, ItemSnapshot, VariantSnapshot};

/// Page size requested when listing a category.
const CATEGORY_PAGE_LIMIT: u32 = 100;

/// HTTP implementation of [`FetchClient`].
#[derive(Debug, Clone)]
pub struct HttpFetchClient {
    client: Client,
    base_url: String,
    user_agent: String,
}

impl HttpFetchClient {
    /// Builds a client with an explicit per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Config`] when the reqwest client cannot be
    /// constructed.
    pub fn new(base_url: &str, user_agent: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Config(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            user_agent: user_agent.to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, FetchError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .get(&url)
            .header(reqwest::header::USER_AGENT, self.user_agent.as_str())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response.bytes().await.map_err(map_transport_error)?;
        serde_json::from_slice(&body).map_err(|e| FetchError::Decode(format!("{url}: {e}")))
    }
}

#[async_trait]
impl FetchClient for HttpFetchClient {
    async fn list_categories(&self) -> Result<Vec<Category>, FetchError> {
        let wire: CategoriesWire = self.get_json("/api/categories").await?;
        Ok(wire.categories.into_iter().map(Category::from).collect())
    }

    async fn list_item_ids(&self, category_id: &str) -> Result<Vec<String>, FetchError> {
        let path =
            format!("/api/category/{category_id}/products?page=1&limit={CATEGORY_PAGE_LIMIT}");
        let wire: ProductListWire = self.get_json(&path).await?;
        Ok(wire.products.into_iter().map(|p| p.id).collect())
    }

    async fn fetch_detail(&self, item_id: &str) -> Result<ItemSnapshot, FetchError> {
        let wire: ProductWire = self.get_json(&format!("/api/product/{item_id}")).await?;
        Ok(wire.into())
    }
}

fn map_transport_error(error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout(error.to_string())
    } else if error.is_decode() {
        FetchError::Decode(error.to_string())
    } else {
        FetchError::Transport(error.to_string())
    }
}

// ── Upstream wire format ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CategoriesWire {
    #[serde(default)]
    categories: Vec<CategoryWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CategoryWire {
    id: i64,
    name: String,
    #[serde(default)]
    parent_id: Option<i64>,
    #[serde(default)]
    level: i32,
}

impl From<CategoryWire> for Category {
    fn from(wire: CategoryWire) -> Self {
        Self {
            external_id: wire.id.to_string(),
            name: wire.name,
            parent_external_id: wire.parent_id.map(|id| id.to_string()),
            level: wire.level,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProductListWire {
    #[serde(default)]
    products: Vec<ProductRefWire>,
}

#[derive(Debug, Deserialize)]
struct ProductRefWire {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProductWire {
    id: String,
    name: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    is_in_stock: bool,
    #[serde(default)]
    rating: f64,
    #[serde(default)]
    rating_count: i64,
    #[serde(default)]
    favorite_count: i64,
    #[serde(default)]
    comment_count: i64,
    #[serde(default)]
    variants: Vec<VariantWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VariantWire {
    id: String,
    price: f64,
    #[serde(default)]
    original_price: f64,
    #[serde(default)]
    stock_count: i64,
    #[serde(default)]
    is_in_stock: bool,
}

impl From<ProductWire> for ItemSnapshot {
    fn from(wire: ProductWire) -> Self {
        Self {
            external_id: wire.id,
            name: wire.name,
            url: wire.url,
            is_active: wire.is_in_stock,
            rating: wire.rating,
            rating_count: wire.rating_count,
            favorite_count: wire.favorite_count,
            comment_count: wire.comment_count,
            variants: wire
                .variants
                .into_iter()
                .map(|v| VariantSnapshot {
                    external_id: v.id,
                    price: v.price,
                    original_price: v.original_price,
                    stock_count: v.stock_count,
                    is_active: v.is_in_stock,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn client_for(server: &mockito::ServerGuard) -> HttpFetchClient {
        let Ok(client) = HttpFetchClient::new(&server.url(), "pricewatch-test", Duration::from_secs(5))
        else {
            panic!("client builds");
        };
        client
    }

    #[tokio::test]
    async fn fetch_detail_maps_upstream_product() {
        let mut server = mockito::Server::new_async().await;
        let body = serde_json::json!({
            "id": "sku-1",
            "name": "Desk Lamp",
            "url": "https://shop.example/p/sku-1",
            "isInStock": true,
            "rating": 4.5,
            "ratingCount": 12,
            "favoriteCount": 140,
            "commentCount": 3,
            "brandName": "ignored",
            "variants": [
                {"id": "v-1", "price": 80.0, "originalPrice": 100.0, "stockCount": 5, "isInStock": true}
            ]
        });
        let mock = server
            .mock("GET", "/api/product/sku-1")
            .match_header("user-agent", "pricewatch-test")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .expect(1)
            .create_async()
            .await;

        let client = client_for(&server);
        let Ok(item) = client.fetch_detail("sku-1").await else {
            panic!("detail should decode");
        };
        mock.assert_async().await;

        assert_eq!(item.external_id, "sku-1");
        assert_eq!(item.favorite_count, 140);
        assert!(item.is_active);
        let Some(variant) = item.variants.first() else {
            panic!("one variant expected");
        };
        assert_eq!(variant.external_id, "v-1");
        assert_eq!(variant.price, 80.0);
        assert_eq!(variant.original_price, 100.0);
        assert_eq!(variant.stock_count, 5);
    }

    #[tokio::test]
    async fn list_item_ids_requests_first_page() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/category/42/products")
            .match_query(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("page".into(), "1".into()),
                mockito::Matcher::UrlEncoded("limit".into(), "100".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"products":[{"id":"a"},{"id":"b"}],"totalCount":2}"#)
            .create_async()
            .await;

        let client = client_for(&server);
        let Ok(ids) = client.list_item_ids("42").await else {
            panic!("ids should decode");
        };
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn list_categories_stringifies_ids() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/categories")
            .with_status(200)
            .with_body(r#"{"categories":[{"id":7,"name":"Home","parentId":1,"level":2}]}"#)
            .create_async()
            .await;

        let client = client_for(&server);
        let Ok(categories) = client.list_categories().await else {
            panic!("categories should decode");
        };
        let Some(home) = categories.first() else {
            panic!("one category expected");
        };
        assert_eq!(home.external_id, "7");
        assert_eq!(home.parent_external_id.as_deref(), Some("1"));
        assert_eq!(home.level, 2);
    }

    #[tokio::test]
    async fn non_success_status_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/product/gone")
            .with_status(503)
            .create_async()
            .await;

        let client = client_for(&server);
        let result = client.fetch_detail("gone").await;
        assert!(matches!(result, Err(FetchError::Status(503))));
    }

    #[tokio::test]
    async fn malformed_body_is_a_decode_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/product/bad")
            .with_status(200)
            .with_body("<html>")
            .create_async()
            .await;

        let client = client_for(&server);
        let result = client.fetch_detail("bad").await;
        assert!(matches!(result, Err(FetchError::Decode(_))));
    }
}
