//! In-process mock REST backend built on `tiny_http`.
//!
//! Routes are keyed by method and path. A route registered with a query
//! string (`/api/cargo?page=1`) matches only that exact URL; one registered
//! without a query matches the path with any query. Unknown routes answer
//! `404 {"detail": "Not Found"}`, like the real backend.

use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tiny_http::{Header, Response, Server, StatusCode};

/// Canned response for a route.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub body: String,
    pub content_type: &'static str,
    /// Sleep before answering (for timeout tests).
    pub delay: Option<Duration>,
}

impl MockResponse {
    #[must_use]
    pub fn json(status: u16, body: &Value) -> Self {
        Self {
            status,
            body: body.to_string(),
            content_type: "application/json",
            delay: None,
        }
    }

    #[must_use]
    pub fn ok(body: &Value) -> Self {
        Self::json(200, body)
    }

    #[must_use]
    pub fn text(status: u16, body: &str) -> Self {
        Self {
            status,
            body: body.to_string(),
            content_type: "text/plain",
            delay: None,
        }
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// A request as the mock received it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    /// Path including the query string.
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RecordedRequest {
    /// Case-insensitive header lookup.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(field, _)| field.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    #[must_use]
    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(&self.body).ok()
    }

    #[must_use]
    pub fn path(&self) -> &str {
        self.url.split('?').next().unwrap_or(&self.url)
    }
}

type Handler = Arc<dyn Fn(&RecordedRequest) -> MockResponse + Send + Sync>;

struct Route {
    method: String,
    url: String,
    handler: Handler,
}

/// Mock backend serving on an ephemeral localhost port until dropped.
pub struct MockBackend {
    base_url: String,
    routes: Arc<Mutex<Vec<Route>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl MockBackend {
    #[must_use]
    pub fn start() -> Self {
        let server = Server::http("127.0.0.1:0").expect("mock http server");
        let base_url = format!("http://{}", server.server_addr());
        let routes: Arc<Mutex<Vec<Route>>> = Arc::new(Mutex::new(Vec::new()));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));

        let thread_routes = Arc::clone(&routes);
        let thread_requests = Arc::clone(&requests);
        let thread_stop = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            while !thread_stop.load(Ordering::Relaxed) {
                let mut req = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };
                let mut body = String::new();
                let _ = req.as_reader().read_to_string(&mut body);
                let recorded = RecordedRequest {
                    method: req.method().to_string().to_ascii_uppercase(),
                    url: req.url().to_string(),
                    headers: req
                        .headers()
                        .iter()
                        .map(|header| (header.field.to_string(), header.value.to_string()))
                        .collect(),
                    body,
                };
                let handler = find_handler(&thread_routes.lock().unwrap(), &recorded);
                thread_requests.lock().unwrap().push(recorded.clone());

                let response = match handler {
                    Some(handler) => handler(&recorded),
                    None => MockResponse::json(404, &serde_json::json!({"detail": "Not Found"})),
                };
                if let Some(delay) = response.delay {
                    thread::sleep(delay);
                }
                let content_type =
                    Header::from_bytes("Content-Type", response.content_type).expect("header");
                let _ = req.respond(
                    Response::from_string(response.body)
                        .with_status_code(StatusCode(response.status))
                        .with_header(content_type),
                );
            }
        });

        Self {
            base_url,
            routes,
            requests,
            stop,
            handle: Some(handle),
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Serve a fixed response. Later registrations for the same route win.
    pub fn route(&self, method: &str, url: &str, response: MockResponse) -> &Self {
        self.route_fn(method, url, move |_| response.clone())
    }

    /// Serve a response computed from the request.
    pub fn route_fn<F>(&self, method: &str, url: &str, handler: F) -> &Self
    where
        F: Fn(&RecordedRequest) -> MockResponse + Send + Sync + 'static,
    {
        self.routes.lock().unwrap().push(Route {
            method: method.to_ascii_uppercase(),
            url: url.to_string(),
            handler: Arc::new(handler),
        });
        self
    }

    /// `POST /api/auth/login` accepting one phone/password pair and answering
    /// with the backend's login payload; anything else gets 401.
    pub fn login(&self, phone: &str, password: &str, token: &str, role: &str) -> &Self {
        let phone = phone.to_string();
        let password = password.to_string();
        let token = token.to_string();
        let role = role.to_string();
        // Other credentials fall through to an earlier `login` registration.
        let previous = self.handler_for("POST", "/api/auth/login");
        self.route_fn("POST", "/api/auth/login", move |request| {
            let body = request.json().unwrap_or(Value::Null);
            let matches = body.get("phone").and_then(Value::as_str) == Some(phone.as_str())
                && body.get("password").and_then(Value::as_str) == Some(password.as_str());
            if matches {
                return MockResponse::ok(&serde_json::json!({
                    "access_token": token,
                    "token_type": "bearer",
                    "user": {
                        "full_name": format!("Test {role}"),
                        "role": role,
                        "phone": phone,
                        "user_number": format!("USR{:06}", token.len()),
                    }
                }));
            }
            match &previous {
                Some(previous) => previous(request),
                None => MockResponse::json(
                    401,
                    &serde_json::json!({"detail": "Incorrect phone or password"}),
                ),
            }
        })
    }

    fn handler_for(&self, method: &str, url: &str) -> Option<Handler> {
        self.routes
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|route| route.method == method && route.url == url)
            .map(|route| Arc::clone(&route.handler))
    }

    /// Every request received so far, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    #[must_use]
    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Requests whose path (query ignored) equals `path`.
    #[must_use]
    pub fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.path() == path)
            .collect()
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn find_handler(routes: &[Route], request: &RecordedRequest) -> Option<Handler> {
    let exact = routes
        .iter()
        .rev()
        .find(|route| route.method == request.method && route.url == request.url);
    let by_path = || {
        routes.iter().rev().find(|route| {
            route.method == request.method && !route.url.contains('?') && route.url == request.path()
        })
    };
    exact
        .or_else(by_path)
        .map(|route| Arc::clone(&route.handler))
}
