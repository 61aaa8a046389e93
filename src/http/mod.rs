//! A minimal HTTP transport tailored to the tus wire protocol.
//!
//! This module intentionally exposes only `GET`/`POST`/`PATCH`/`HEAD` and a
//! JSON/bytes body — everything the tus creation/offset/chunk exchange
//! needs, nothing more.
//!
//! ```ignore
//! use tus_client::http::HttpClient;
//!
//! let client = HttpClient::new();
//! let response = client.head("https://tus.example.com/files/abc").send().await?;
//! println!("status: {}", response.status());
//! ```

mod client;
mod request;
mod response;

pub use client::{Authentication, HttpClient, HttpClientBuilder, HttpClientConfig};
pub use request::{HttpMethod, HttpRequest, HttpRequestBuilder, RequestBody};
pub use response::HttpResponse;
