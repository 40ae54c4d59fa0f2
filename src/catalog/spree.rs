use super::{
    CatalogClient, CatalogError, NewProduct, NewTaxon, NewTaxonomy, ProductHandle, ProductUpdate,
    TaxonHandle, TaxonomyHandle, correlation_tag,
};
use crate::config::{CatalogConfig, HttpConfig};
use crate::http::{ClientPurpose, build_client};
use crate::models::RecordId;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, RequestBuilder, Response, multipart};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::json;
use std::path::Path;
use tracing::debug;
use urlencoding::encode;

/// REST client for the store's catalog API, authenticated with basic auth.
#[derive(Debug, Clone)]
pub struct SpreeClient {
    base_url: String,
    user: String,
    password: String,
    http: Client,
    uploads: Client,
}

impl SpreeClient {
    pub fn new(catalog: &CatalogConfig, http: &HttpConfig) -> Self {
        let mut base_url = catalog.base_url.trim().to_string();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self {
            base_url,
            user: catalog.user.clone(),
            password: catalog.password.clone(),
            http: build_client(http, ClientPurpose::Api),
            uploads: build_client(http, ClientPurpose::Upload),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        if self.user.is_empty() {
            request
        } else {
            request.basic_auth(&self.user, Some(&self.password))
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, CatalogError> {
        let response = self
            .authed(self.http.get(self.url(path)).query(query))
            .send()
            .await
            .map_err(|err| CatalogError::Request(err.to_string()))?;
        decode(check_status(response).await?).await
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, CatalogError> {
        let response = self
            .authed(self.http.post(self.url(path)).json(body))
            .send()
            .await
            .map_err(|err| CatalogError::Request(err.to_string()))?;
        decode(check_status(response).await?).await
    }

    async fn put_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<(), CatalogError> {
        let response = self
            .authed(self.http.put(self.url(path)).json(body))
            .send()
            .await
            .map_err(|err| CatalogError::Request(err.to_string()))?;
        check_status(response).await?;
        Ok(())
    }
}

async fn check_status(response: Response) -> Result<Response, CatalogError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(CatalogError::Status {
        status: status.as_u16(),
        body: truncate(&body, 300),
    })
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, CatalogError> {
    response
        .json::<T>()
        .await
        .map_err(|err| CatalogError::Decode(err.to_string()))
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct TaxonomyPage {
    #[serde(default)]
    taxonomies: Vec<TaxonomyHandle>,
}

#[derive(Debug, Deserialize)]
struct TaxonPage {
    #[serde(default)]
    taxons: Vec<TaxonHandle>,
}

#[derive(Debug, Deserialize)]
struct ProductPage {
    #[serde(default)]
    products: Vec<ProductHandle>,
}

fn product_path(product: &ProductHandle) -> String {
    format!("products/{}.json", product.id)
}

/// The search includes soft-deleted products, so a live match wins over
/// any deleted copy carrying the same tag.
fn live_first(products: Vec<ProductHandle>, stock_id: RecordId) -> Option<ProductHandle> {
    products
        .into_iter()
        .filter(|product| product.correlation_id() == Some(stock_id))
        .min_by_key(ProductHandle::is_deleted)
}

fn image_path(product: &ProductHandle) -> String {
    format!("admin/products/{}/images", encode(&product.permalink))
}

#[async_trait]
impl CatalogClient for SpreeClient {
    async fn list_taxonomies(&self) -> Result<Vec<TaxonomyHandle>, CatalogError> {
        let page: TaxonomyPage = self
            .get_json("taxonomies.json", &[("per_page", "1000".into())])
            .await?;
        Ok(page.taxonomies)
    }

    async fn list_taxons(&self) -> Result<Vec<TaxonHandle>, CatalogError> {
        let page: TaxonPage = self
            .get_json("taxons.json", &[("per_page", "10000".into())])
            .await?;
        Ok(page.taxons)
    }

    async fn create_taxonomy(&self, fields: &NewTaxonomy) -> Result<TaxonomyHandle, CatalogError> {
        debug!(target = "catalog_sync.catalog", name = %fields.name, "create_taxonomy");
        self.post_json("taxonomies.json", &json!({ "taxonomy": fields }))
            .await
    }

    async fn create_taxon(&self, fields: &NewTaxon) -> Result<TaxonHandle, CatalogError> {
        debug!(
            target = "catalog_sync.catalog",
            name = %fields.name,
            taxonomy_id = fields.taxonomy_id,
            "create_taxon"
        );
        self.post_json("taxons.json", &json!({ "taxon": fields })).await
    }

    async fn create_product(&self, fields: &NewProduct) -> Result<ProductHandle, CatalogError> {
        debug!(target = "catalog_sync.catalog", tag = %fields.meta_description, "create_product");
        self.post_json("products.json", &json!({ "product": fields }))
            .await
    }

    async fn find_product_by_correlation_id(
        &self,
        stock_id: RecordId,
    ) -> Result<Option<ProductHandle>, CatalogError> {
        let page: ProductPage = self
            .get_json(
                "products.json",
                &[
                    ("q[meta_description_eq]", correlation_tag(stock_id)),
                    ("show_deleted", "true".into()),
                ],
            )
            .await?;
        Ok(live_first(page.products, stock_id))
    }

    async fn update_product(
        &self,
        product: &ProductHandle,
        fields: &ProductUpdate,
    ) -> Result<(), CatalogError> {
        self.put_json(&product_path(product), &json!({ "product": fields }))
            .await
    }

    async fn soft_delete_product(&self, product: &ProductHandle) -> Result<(), CatalogError> {
        self.put_json(
            &product_path(product),
            &json!({ "product": { "deleted_at": Utc::now() } }),
        )
        .await
    }

    async fn upload_image(&self, path: &Path, product: &ProductHandle) -> Result<(), CatalogError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|err| CatalogError::File {
                path: path.display().to_string(),
                message: err.to_string(),
            })?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image.jpg".to_string());
        let part = multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("image/jpeg")
            .map_err(|err| CatalogError::Request(err.to_string()))?;
        let form = multipart::Form::new().part("image[attachment]", part);
        let response = self
            .authed(self.uploads.post(self.url(&image_path(product))).multipart(form))
            .send()
            .await
            .map_err(|err| CatalogError::Request(err.to_string()))?;
        check_status(response).await?;
        Ok(())
    }
}
