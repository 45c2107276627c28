#![deny(clippy::all, clippy::pedantic)]

use reqwest::{Client, Method, Response, StatusCode, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use murmur_api_types::ApiErrorBody;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("failed to read input file {path}: {source}")]
    InputFile {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{status} {code}: {message}")]
    Api {
        status: StatusCode,
        code: String,
        message: String,
    },
    #[error("server error: {0}")]
    Server(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

#[derive(Clone, Debug)]
pub struct Ctx {
    pub client: Client,
    pub base: Url,
}

impl Ctx {
    pub fn new(server: &str) -> Result<Self, CliError> {
        let base = Url::parse(server)?.join("/")?;
        let client = Client::builder().user_agent(Self::user_agent()).build()?;
        Ok(Self { client, base })
    }

    pub fn user_agent() -> &'static str {
        concat!("murmur-cli/", env!("CARGO_PKG_VERSION"))
    }

    pub fn url(&self, path: &str) -> Result<Url, CliError> {
        self.base.join(path).map_err(CliError::Url)
    }

    pub async fn request<T, B>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&B>,
    ) -> Result<T, CliError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let mut url = self.url(path)?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }

        let mut req = self.client.request(method, url);
        if let Some(body) = body {
            req = req.json(body);
        }
        Self::handle(req.send().await?).await
    }

    /// Issue a request whose success carries no body; returns the status.
    pub async fn request_status(&self, method: Method, path: &str) -> Result<StatusCode, CliError> {
        let resp = self.client.request(method, self.url(path)?).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let bytes = resp.bytes().await?;
            return Err(api_error(status, &bytes));
        }
        Ok(status)
    }

    async fn handle<T: DeserializeOwned>(resp: Response) -> Result<T, CliError> {
        let status = resp.status();
        let bytes = resp.bytes().await?;
        if !status.is_success() {
            return Err(api_error(status, &bytes));
        }
        serde_json::from_slice(&bytes)
            .map_err(|e| CliError::Server(format!("failed to parse body: {e}")))
    }
}

pub fn api_error(status: StatusCode, bytes: &[u8]) -> CliError {
    match serde_json::from_slice::<ApiErrorBody>(bytes) {
        Ok(body) => CliError::Api {
            status,
            code: body.error.code,
            message: match body.error.hint {
                Some(hint) => format!("{} ({hint})", body.error.message),
                None => body.error.message,
            },
        },
        Err(_) => CliError::Server(format!(
            "status {status} body {}",
            String::from_utf8_lossy(bytes)
        )),
    }
}
