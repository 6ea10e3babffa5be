//! Scripted [`Transport`] for exercising the fetch and orchestration
//! pipeline without a network. Responses pop in push order; once the
//! script runs out, the fallback (or an empty 200) answers everything.

use crate::fetch::{FetchError, Transport, TransportResponse};
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;

type Scripted = Result<TransportResponse, FetchError>;

pub struct MockTransport {
    responses: Mutex<Vec<Scripted>>,
    fallback: Option<Scripted>,
    delay: Option<Duration>,
    calls: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new(mut responses: Vec<Scripted>) -> Self {
        responses.reverse();
        MockTransport {
            responses: Mutex::new(responses),
            fallback: None,
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Script plus a response that repeats after the script is consumed.
    pub fn with_fallback(responses: Vec<Scripted>, fallback: Scripted) -> Self {
        let mut transport = Self::new(responses);
        transport.fallback = Some(fallback);
        transport
    }

    /// Add a fixed delay before every response.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn ok(body: &str) -> Scripted {
        Ok(TransportResponse {
            status: 200,
            body: body.to_string(),
            retry_after: None,
        })
    }

    pub fn status(status: u16, body: &str) -> Scripted {
        Ok(TransportResponse {
            status,
            body: body.to_string(),
            retry_after: None,
        })
    }

    pub fn rate_limited(retry_after: Option<Duration>) -> Scripted {
        Ok(TransportResponse {
            status: 429,
            body: "too many requests".to_string(),
            retry_after,
        })
    }

    /// URLs requested so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl Transport for MockTransport {
    fn get<'a>(
        &'a self,
        url: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<TransportResponse, FetchError>> + Send + 'a>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(url.to_string());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let next = self.responses.lock().unwrap().pop();
            match next {
                Some(scripted) => scripted,
                None => self
                    .fallback
                    .clone()
                    .unwrap_or_else(|| MockTransport::ok("{}")),
            }
        })
    }
}
