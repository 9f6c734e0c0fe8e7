// Author: Jacques Murray

//! The BCA API client.

use std::future::Future;
use std::sync::Arc;

use chrono::Local;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::classify::ErrorClassifier;
use crate::config::Config;
use crate::context::CallContext;
use crate::dto::{AuthToken, BalanceInformation};
use crate::error::{Error, RemoteError};
use crate::session::{Session, SessionStore};
use crate::session_log::{LogContext, LogRecord, SessionLog, SessionLogger, TracingLogger};
use crate::signature;
use crate::Retry;

const TOKEN_PATH: &str = "/api/oauth/token";

/// Authenticates against the BCA API and calls it.
///
/// Business calls that fail with the stale-session code are retried after a
/// fresh authentication, up to `config.retry.max_retries` times. A client can
/// be shared between tasks; concurrent calls share one session.
pub struct Client {
    http: reqwest::Client,
    config: Config,
    classifier: ErrorClassifier,
    session: SessionStore,
    logger: Arc<dyn SessionLogger>,
}

impl Client {
    /// Builds a client that logs JSON to the rotating file in `config.log`.
    pub fn new(config: Config) -> Result<Self, Error> {
        config.validate()?;
        let logger = TracingLogger::from_config(&config.log)?;
        Self::with_logger(config, Arc::new(logger))
    }

    /// Builds a client that logs through `logger`.
    pub fn with_logger(config: Config, logger: Arc<dyn SessionLogger>) -> Result<Self, Error> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            http,
            classifier: config.retry.classifier(),
            config,
            session: SessionStore::default(),
            logger,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The session from the latest successful authentication.
    pub fn session(&self) -> Option<Arc<Session>> {
        self.session.current()
    }

    /// A logger tagged with `ctx` and the current session.
    pub fn log(&self, ctx: &CallContext) -> SessionLog<'_> {
        SessionLog::new(
            self.logger.as_ref(),
            LogContext::new(ctx, self.session.current_id()),
        )
    }

    /// Requests a new access token and makes it the current session.
    pub async fn authenticate(&self, ctx: &CallContext) -> Result<Arc<Session>, Error> {
        let token = ctx
            .guard(self.request_token())
            .await
            .map_err(Error::interrupted)??;

        let session = self.session.replace(Session::from(token));
        self.log(ctx).info("authenticated");
        Ok(session)
    }

    async fn request_token(&self) -> Result<AuthToken, Error> {
        let response = self
            .http
            .post(format!("{}{}", self.config.base_url(), TOKEN_PATH))
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;
        decode(response).await
    }

    /// Balance of up to 20 accounts of a corporate.
    pub async fn balance_information(
        &self,
        ctx: &CallContext,
        corporate_id: &str,
        account_numbers: &[&str],
    ) -> Result<BalanceInformation, Error> {
        let path = format!(
            "/banking/v3/corporates/{}/accounts/{}",
            corporate_id,
            account_numbers.join(",")
        );
        self.execute::<BalanceInformation, ()>(ctx, Method::GET, &path, &[], None)
            .await
    }

    /// Sends a signed business call.
    ///
    /// Authenticates first when no session is held. A response carrying the
    /// recoverable code triggers re-authentication and a retry; any other
    /// failure is returned at once.
    pub async fn execute<T, B>(
        &self,
        ctx: &CallContext,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&B>,
    ) -> Result<T, Error>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let body = match body {
            Some(body) => serde_json::to_vec(body)?,
            None => Vec::new(),
        };
        let relative_url = signature::relative_url(path, query);

        if self.session.current().is_none() {
            self.authenticate(ctx).await?;
        }

        let method = &method;
        let relative_url = relative_url.as_str();
        let body = body.as_slice();
        self.with_session_retry(ctx, move || self.send_signed(method, relative_url, body))
            .await
    }

    /// Runs `operation` under the session-recovery retry policy.
    async fn with_session_retry<T, O, F>(&self, ctx: &CallContext, operation: O) -> Result<T, Error>
    where
        O: FnMut() -> F,
        F: Future<Output = Result<T, Error>>,
    {
        Retry::new(self.config.retry.delays(), operation)
            .with_max_retries(self.config.retry.max_retries)
            .with_condition(move |error: &Error| self.classifier.is_recoverable(error))
            .with_recovery(move |attempt: u32, error: &Error| {
                let error = error.to_string();
                self.recover(ctx, attempt, error)
            })
            .with_context(ctx.clone())
            .run()
            .await
            .map_err(Error::from)
    }

    /// Re-authenticates before a retry. A failure is logged and returned to
    /// the retry loop, which carries on regardless.
    async fn recover(
        &self,
        ctx: &CallContext,
        attempt: u32,
        error: String,
    ) -> Result<Arc<Session>, Error> {
        self.log(ctx).record(
            LogRecord::info("session retry started")
                .with_attempt(attempt)
                .with_error(&error),
        );

        let outcome = self.authenticate(ctx).await;
        if let Err(err) = &outcome {
            // An interrupted call is reported by the retry loop, not here.
            if ctx.interrupted().is_none() {
                self.log(ctx).error("re-authentication failed", err);
            }
        }

        self.log(ctx)
            .record(LogRecord::info("session retry finished").with_attempt(attempt));
        outcome
    }

    async fn send_signed<T: DeserializeOwned>(
        &self,
        method: &Method,
        relative_url: &str,
        body: &[u8],
    ) -> Result<T, Error> {
        let session = self.session.current().ok_or(Error::NotAuthenticated)?;
        let timestamp = signature::timestamp(Local::now().fixed_offset());
        let signature = signature::sign(
            &self.config.api_secret,
            &signature::string_to_sign(
                method.as_str(),
                relative_url,
                session.access_token(),
                body,
                &timestamp,
            ),
        );

        let mut request = self
            .http
            .request(
                method.clone(),
                format!("{}{}", self.config.base_url(), relative_url),
            )
            .bearer_auth(session.access_token())
            .header("X-BCA-Key", &self.config.api_key)
            .header("X-BCA-Timestamp", &timestamp)
            .header("X-BCA-Signature", signature);
        if !self.config.origin.is_empty() {
            request = request.header("Origin", &self.config.origin);
        }
        if !body.is_empty() {
            request = request
                .header(CONTENT_TYPE, "application/json")
                .body(body.to_vec());
        }

        decode(request.send().await?).await
    }
}

/// Turns a response into `T`, or into [`Error::Remote`] when it is not a success.
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, Error> {
    let status = response.status();
    let body = response.bytes().await?;
    if !status.is_success() {
        return Err(Error::Remote(RemoteError::from_response(status.as_u16(), &body)));
    }
    Ok(serde_json::from_slice(&body)?)
}
