//! We use this mocking module in unit tests to stand in for the game server.

use std::sync::Mutex;

use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::http::{HttpRequest, HttpResponse, HttpTransport, TransportError};

type Reply = Result<HttpResponse, TransportError>;

/// Scripted HTTP transport.
///
/// Replies are matched on the end of the request URL, the most recently scripted match wins. Unmatched
/// requests get a 404.
pub struct MockHttp {
    routes: Mutex<Vec<(String, Reply)>>,
    requests: Mutex<Vec<HttpRequest>>,
    gate: Mutex<Option<Receiver<()>>>,
}

impl MockHttp {
    pub fn new() -> Self {
        Self {
            routes: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            gate: Mutex::new(None),
        }
    }

    pub fn respond(&self, path: &str, status: u16, body: &[u8]) {
        self.script(
            path,
            Ok(HttpResponse {
                status,
                body: body.to_vec(),
            }),
        );
    }

    pub fn fail(&self, path: &str, error: TransportError) {
        self.script(path, Err(error));
    }

    /// Hold every following request until a `()` is sent on the returned channel, one per request.
    pub fn hold_requests(&self) -> Sender<()> {
        let (tx, rx) = unbounded();
        *self.gate.lock().unwrap() = Some(rx);
        tx
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> Option<HttpRequest> {
        self.requests.lock().unwrap().last().cloned()
    }

    fn script(&self, path: &str, reply: Reply) {
        self.routes.lock().unwrap().push((path.to_owned(), reply));
    }
}

impl HttpTransport for MockHttp {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.recv()
                .map_err(|_| TransportError::Other("gate closed".to_owned()))?;
        }

        self.routes
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(path, _)| request.url.ends_with(path.as_str()))
            .map(|(_, reply)| reply.clone())
            .unwrap_or(Ok(HttpResponse {
                status: 404,
                body: Vec::new(),
            }))
    }
}
