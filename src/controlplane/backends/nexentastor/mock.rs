//! Scripted in-memory transport for tests

use super::rest::{RestResponse, Transport};
use crate::context::RequestContext;
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use std::collections::VecDeque;

/// One request as seen by the transport
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    pub token: Option<String>,
}

type Reply = Result<(u16, Value)>;
type Handler = Box<dyn Fn(&RecordedRequest) -> Reply + Send + Sync>;

/// Transport answering from a FIFO script, or from a handler function
pub struct ScriptedTransport {
    address: String,
    script: Mutex<VecDeque<Reply>>,
    handler: Option<Handler>,
    requests: Mutex<Vec<RecordedRequest>>,
    token: Mutex<Option<String>>,
}

impl ScriptedTransport {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            script: Mutex::new(VecDeque::new()),
            handler: None,
            requests: Mutex::new(Vec::new()),
            token: Mutex::new(None),
        }
    }

    pub fn with_handler<F>(address: &str, handler: F) -> Self
    where
        F: Fn(&RecordedRequest) -> Reply + Send + Sync + 'static,
    {
        Self {
            handler: Some(Box::new(handler)),
            ..Self::new(address)
        }
    }

    /// Queue a response
    pub fn respond(&self, status: u16, body: Value) -> &Self {
        self.script.lock().push_back(Ok((status, body)));
        self
    }

    /// Queue a failure to send
    pub fn fail(&self, err: Error) -> &Self {
        self.script.lock().push_back(Err(err));
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    pub fn token(&self) -> Option<String> {
        self.token.lock().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(
        &self,
        _ctx: &RequestContext,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<RestResponse> {
        let request = RecordedRequest {
            method,
            path: path.to_string(),
            body: body.cloned(),
            token: self.token(),
        };
        self.requests.lock().push(request.clone());

        let reply = match &self.handler {
            Some(handler) => handler(&request),
            None => self.script.lock().pop_front().unwrap_or_else(|| {
                Err(Error::Transport {
                    endpoint: self.address.clone(),
                    reason: format!("no scripted response for {} {}", request.method, path),
                })
            }),
        };
        let (status, body) = reply?;

        Ok(RestResponse {
            status: StatusCode::from_u16(status).expect("valid status code"),
            body,
        })
    }

    fn set_auth_token(&self, token: String) {
        *self.token.lock() = Some(token);
    }

    fn address(&self) -> &str {
        &self.address
    }
}
