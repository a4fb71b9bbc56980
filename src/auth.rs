//! Login and region resolution.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;

use crate::clock::Clock;
use crate::error::{EwelinkError, Result};
use crate::http::HttpTransport;
use crate::types::{Account, Credentials};

const API_VERSION: u8 = 8;
const ERROR_REGION_REDIRECT: i64 = 301;

/// Who is logging in
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Email(String),
    Phone(String),
}

impl Identity {
    /// Pick the identity of an account
    ///
    /// Exactly one of email and phone number must be set.
    pub fn from_account(account: &Account) -> Result<Self> {
        match (&account.email, &account.phone_number) {
            (Some(_), Some(_)) => Err(EwelinkError::Configuration(
                "email and phone number are mutually exclusive".to_string(),
            )),
            (Some(email), None) => Ok(Self::Email(email.clone())),
            (None, Some(phone)) => Ok(Self::Phone(phone.clone())),
            (None, None) => Err(EwelinkError::Configuration(
                "email or phone number is required".to_string(),
            )),
        }
    }
}

#[derive(Debug, Serialize)]
struct LoginBody<'a> {
    appid: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<&'a str>,
    #[serde(rename = "phoneNumber", skip_serializing_if = "Option::is_none")]
    phone_number: Option<&'a str>,
    password: String,
    ts: i64,
    version: u8,
    nonce: String,
}

#[derive(Debug, Deserialize)]
struct LoginReply {
    #[serde(default)]
    error: i64,
    #[serde(default)]
    at: Option<String>,
    #[serde(default)]
    user: Option<LoginUser>,
    #[serde(default)]
    region: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoginUser {
    #[serde(default, alias = "apiKey")]
    apikey: Option<String>,
}

/// Lowercase hex MD5 digest of the password, as expected by the login endpoint
pub fn password_digest(password: &str) -> String {
    format!("{:x}", Md5::digest(password.as_bytes()))
}

/// Base64 HMAC-SHA256 signature of a request body
pub fn sign(app_secret: &str, body: &str) -> Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(app_secret.as_bytes())
        .map_err(|e| EwelinkError::Configuration(format!("invalid app secret: {}", e)))?;
    mac.update(body.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Exchanges an account identity and password for session credentials
pub struct CredentialResolver {
    rest: Arc<HttpTransport>,
    clock: Arc<dyn Clock>,
}

impl CredentialResolver {
    pub fn new(rest: Arc<HttpTransport>, clock: Arc<dyn Clock>) -> Self {
        Self { rest, clock }
    }

    /// Log in and return the account credentials
    ///
    /// Starts from `region` (or the configured region). A region redirect
    /// from the server is followed once; a second redirect fails with
    /// [`EwelinkError::RegionRedirect`]. On success the transport is switched
    /// to the returned credentials.
    pub async fn resolve(&self, account: &Account, region: Option<&str>) -> Result<Credentials> {
        let identity = Identity::from_account(account)?;
        let password = account
            .password
            .as_ref()
            .map(ExposeSecret::expose_secret)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| EwelinkError::Configuration("password is required".to_string()))?;

        let mut region = region
            .unwrap_or_else(|| self.rest.config().region())
            .to_string();
        let mut redirected = false;

        loop {
            let raw = self.login_once(&identity, password, &region).await?;
            let reply: LoginReply = serde_json::from_value(raw.clone()).map_err(|e| {
                EwelinkError::Authentication(format!("malformed login response: {}", e))
            })?;

            match reply.error {
                0 => {
                    let credentials = Self::credentials_from(reply, region)?;
                    tracing::info!("Logged in, account region is {}", credentials.region);
                    self.rest.set_credentials(credentials.clone());
                    return Ok(credentials);
                }
                ERROR_REGION_REDIRECT => match reply.region {
                    Some(target) if !redirected && target != region => {
                        tracing::info!("Account lives in region {}, retrying login", target);
                        region = target;
                        redirected = true;
                    }
                    Some(target) => return Err(EwelinkError::RegionRedirect { region: target }),
                    None => {
                        return Err(EwelinkError::Authentication(
                            "region redirect without a region".to_string(),
                        ))
                    }
                },
                400 | 401 | 404 => {
                    return Err(EwelinkError::Authentication(
                        "invalid account credentials".to_string(),
                    ))
                }
                code => return Err(EwelinkError::api(code, raw)),
            }
        }
    }

    async fn login_once(&self, identity: &Identity, password: &str, region: &str) -> Result<Value> {
        let stamp = self.clock.stamp();
        let (email, phone_number) = match identity {
            Identity::Email(email) => (Some(email.as_str()), None),
            Identity::Phone(phone) => (None, Some(phone.as_str())),
        };
        let body = serde_json::to_string(&LoginBody {
            appid: self.rest.config().app_id(),
            email,
            phone_number,
            password: password_digest(password),
            ts: stamp.ts,
            version: API_VERSION,
            nonce: stamp.nonce,
        })?;

        let signature = match self.rest.config().app_secret() {
            Some(secret) => Some(sign(secret, &body)?),
            None => None,
        };
        self.rest.login(region, body, signature).await
    }

    fn credentials_from(reply: LoginReply, region: String) -> Result<Credentials> {
        let access_token = reply
            .at
            .filter(|at| !at.is_empty())
            .ok_or_else(|| EwelinkError::Authentication("login response missing token".to_string()))?;
        let api_key = reply
            .user
            .and_then(|u| u.apikey)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| EwelinkError::Authentication("login response missing apikey".to_string()))?;

        Ok(Credentials {
            access_token: SecretString::from(access_token),
            api_key,
            region: reply.region.unwrap_or(region),
        })
    }
}
