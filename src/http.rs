use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::envelope::ExtendError;

/// Username + optional password for HTTP basic auth
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BasicAuth {
    pub user: String,
    pub password: Option<String>,
}

pub fn client(timeout: Duration, insecure: bool) -> Result<reqwest::Client, ExtendError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .danger_accept_invalid_certs(insecure)
        .user_agent(concat!("lnms-extend/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|source| ExtendError::Http {
            url: String::new(),
            source,
        })
}

/// GET a URL and deserialize the JSON body. Non 2xx statuses are errors
pub async fn get_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    auth: Option<&BasicAuth>,
) -> Result<T, ExtendError> {
    let mut request = client.get(url);
    if let Some(auth) = auth {
        request = request.basic_auth(&auth.user, auth.password.as_ref());
    }
    debug!("GET {}", url);
    let map_err = |source| ExtendError::Http {
        url: url.to_string(),
        source,
    };
    let response = request
        .send()
        .await
        .and_then(|response| response.error_for_status())
        .map_err(map_err)?;
    response.json::<T>().await.map_err(map_err)
}
