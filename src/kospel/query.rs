use core::time::Duration;
use log::debug;
use reqwest::blocking::Client;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Url;
use serde_json::Value;
use std::sync::Arc;

use super::{Credentials, Device, REGISTERS};
use crate::cache::SessionCache;
use crate::error::Error;

pub const BASE_URL: &str = "https://ha.kospel.pl";
pub const SESSION_COOKIE: &str = "KOSPELSESSID";

const ORIGIN: &str = "https://ha.kospel.pl";
const ACCEPT_JSON: &str = "application/json, text/javascript, */*; q=0.01";
const ACCEPT_VENDOR: &str = "application/vnd.kospel.cmi-v1+json";
const CONTENT_JSON: &str = "application/json; charset=UTF-8";
const CONTENT_FORM: &str = "application/x-www-form-urlencoded; charset=UTF-8";

// Sent on every request, mirroring the browser session the API expects.
const SESSION_HEADERS: &[(&str, &str)] = &[
    ("x-requested-with", "XMLHttpRequest"),
    (
        "user-agent",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_14_6) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/84.0.4147.125 Safari/537.36",
    ),
    ("sec-fetch-site", "same-origin"),
    ("sec-fetch-mode", "cors"),
    ("sec-fetch-dest", "empty"),
    ("connection", "keep-alive"),
    ("accept-language", "en-GB,en-US;q=0.9,en;q=0.8"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub headers: Vec<(&'static str, &'static str)>,
    pub body: Option<String>,
}

impl Request {
    fn get(path: impl Into<String>) -> Request {
        Request {
            method: Method::Get,
            path: path.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    fn post(path: impl Into<String>, body: impl Into<String>) -> Request {
        Request {
            method: Method::Post,
            path: path.into(),
            headers: Vec::new(),
            body: Some(body.into()),
        }
    }

    fn header(mut self, name: &'static str, value: &'static str) -> Request {
        self.headers.push((name, value));
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub body: String,
    /// Session cookie held by the transport after this exchange.
    pub session_token: Option<String>,
}

impl Response {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// One HTTP exchange against the vendor API, on a persistent cookie context.
pub trait Transport {
    fn send(&mut self, request: Request) -> Result<Response, Error>;
}

pub struct HttpTransport {
    client: Client,
    jar: Arc<Jar>,
    base: Url,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration, session_token: Option<&str>) -> Result<HttpTransport, Error> {
        let base = base_url.parse::<Url>().map_err(|err| Error::BaseUrl {
            url: base_url.to_string(),
            reason: err.to_string(),
        })?;

        let jar = Arc::new(Jar::default());
        if let Some(token) = session_token {
            jar.add_cookie_str(&format!("{SESSION_COOKIE}={token}"), &base);
        }

        let mut headers = HeaderMap::new();
        for &(name, value) in SESSION_HEADERS {
            headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
        }

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .cookie_provider(Arc::clone(&jar))
            .build()?;

        Ok(HttpTransport { client, jar, base })
    }

    fn session_token(&self, url: &Url) -> Option<String> {
        let cookies = self.jar.cookies(url)?;
        let cookies = cookies.to_str().ok()?;
        cookies.split("; ").find_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            (name == SESSION_COOKIE).then(|| value.to_string())
        })
    }
}

impl Transport for HttpTransport {
    fn send(&mut self, request: Request) -> Result<Response, Error> {
        let url = self.base.join(&request.path).map_err(|err| Error::BaseUrl {
            url: format!("{}{}", self.base, request.path),
            reason: err.to_string(),
        })?;
        let mut builder = match request.method {
            Method::Get => self.client.get(url.clone()),
            Method::Post => self.client.post(url.clone()),
        };
        for (name, value) in request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send()?;
        let status = response.status().as_u16();
        let body = response.text()?;
        Ok(Response {
            status,
            body,
            session_token: self.session_token(&url),
        })
    }
}

fn send_logged<T: Transport>(transport: &mut T, request: Request) -> Result<Response, Error> {
    let response = transport.send(request)?;
    debug!("{}", response.body.trim());
    Ok(response)
}

/// JSON string literal with everything outside printable ASCII as `\uXXXX`
/// (UTF-16 units), the encoding the web client sends credentials in.
fn ascii_json(text: &str) -> Result<String, Error> {
    let encoded = serde_json::to_string(text)?;
    let mut escaped = String::with_capacity(encoded.len());
    for c in encoded.chars() {
        if (c as u32) < 0x7f {
            escaped.push(c);
        } else {
            for unit in c.encode_utf16(&mut [0; 2]) {
                escaped += &format!("\\u{unit:04x}");
            }
        }
    }
    Ok(escaped)
}

fn dologin<T: Transport>(transport: &mut T, credentials: &Credentials, cache: &SessionCache) -> Result<(), Error> {
    let body = format!(
        "{{\"username\": {}, \"password\": {}}}",
        ascii_json(&credentials.username)?,
        ascii_json(&credentials.password)?,
    );
    let request = Request::post("/api/dologin", body)
        .header("Accept", ACCEPT_JSON)
        .header("Content-Type", CONTENT_JSON)
        .header("Origin", ORIGIN)
        .header("Referer", "https://ha.kospel.pl/");
    let response = send_logged(transport, request)?;
    if response.is_success() {
        if let Some(token) = response.session_token.as_deref() {
            cache.save(token);
        }
    }
    Ok(())
}

fn seldev<T: Transport>(transport: &mut T, device: &Device) -> Result<(), Error> {
    let body = format!("{{\"dev\":\"/connectedDevices\",\"devSN\":\"{}\"}}", device.serial);
    let request = Request::post("/api/seldev", body)
        .header("Accept", ACCEPT_JSON)
        .header("Content-Type", CONTENT_JSON)
        .header("Origin", ORIGIN)
        .header("Referer", "https://ha.kospel.pl/mdevs");
    send_logged(transport, request).map(drop)
}

fn bootstrap<T: Transport>(transport: &mut T) -> Result<(), Error> {
    let request = Request::get("/api")
        .header("Accept", ACCEPT_VENDOR)
        .header("Referer", "https://ha.kospel.pl/connectedDevices");
    send_logged(transport, request).map(drop)
}

fn read_device_name<T: Transport>(transport: &mut T) -> Result<(), Error> {
    let request = Request::post("/api/cmi/read/254", "[\"CMI__NAME\"]")
        .header("Accept", ACCEPT_VENDOR)
        .header("Content-Type", CONTENT_FORM)
        .header("Origin", ORIGIN)
        .header("Referer", "https://ha.kospel.pl/connectedDevices");
    send_logged(transport, request).map(drop)
}

fn select_module<T: Transport>(transport: &mut T, device: &Device) -> Result<(), Error> {
    let body = format!("id={}&devType={}", device.module_id, device.device_type);
    let request = Request::post("/api/selectModule", body)
        .header("Accept", "*/*")
        .header("Content-Type", CONTENT_FORM)
        .header("Origin", ORIGIN)
        .header("Referer", "https://ha.kospel.pl/connectedDevices");
    send_logged(transport, request).map(drop)
}

fn session_device<T: Transport>(transport: &mut T) -> Result<(), Error> {
    let request = Request::get("/api/sessionDevice")
        .header("Accept", ACCEPT_VENDOR)
        .header("Referer", "https://ha.kospel.pl/ekd");
    send_logged(transport, request).map(drop)
}

/// Replays the browser login flow up to a session bound to `device`.
///
/// No step checks its own result; whether the session works is only known
/// from the next read.
pub fn login<T: Transport>(
    transport: &mut T,
    credentials: &Credentials,
    device: &Device,
    cache: &SessionCache,
) -> Result<(), Error> {
    dologin(transport, credentials, cache)?;
    seldev(transport, device)?;
    bootstrap(transport)?;
    read_device_name(transport)?;
    select_module(transport, device)?;
    session_device(transport)
}

pub fn read_body() -> String {
    let names: Vec<&str> = REGISTERS.iter().map(|&(name, _, _)| name).collect();
    format!("[\"{}\"]", names.join("\",\""))
}

pub fn query<T: Transport>(transport: &mut T, device: &Device) -> Result<Value, Error> {
    let request = Request::post(format!("/api/ekd/read/{}", device.module_id), read_body())
        .header("Accept", ACCEPT_VENDOR)
        .header("Content-Type", CONTENT_FORM)
        .header("Origin", ORIGIN)
        .header("Referer", "https://ha.kospel.pl/ekd");
    let response = transport.send(request)?;
    Ok(serde_json::from_str(&response.body)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        requests: Vec<Request>,
    }

    impl Transport for Recorder {
        fn send(&mut self, request: Request) -> Result<Response, Error> {
            let session_token = (request.path == "/api/dologin").then(|| "fresh".to_string());
            self.requests.push(request);
            Ok(Response {
                status: 200,
                body: "{\"status\":0}\n".to_string(),
                session_token,
            })
        }
    }

    #[test]
    fn read_body_lists_registers_without_whitespace() {
        assert_eq!(
            read_body(),
            "[\"TEMP_IN\",\"TEMP_OUT\",\"FACTOR_SETTING\",\"TEMP_ROOM\",\"TEMP_EXT\",\
             \"HU_INCLUDED_POWER\",\"PRESSURE\",\"FLOW\",\"FLAG_CH_PUMP_OFF_ON\",\
             \"FLAG_IN_NA\",\"FLAG_IN_RP\",\"FLAG_IN_FUN\"]"
        );
    }

    #[test]
    fn login_runs_six_steps_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SessionCache::new(dir.path().join(".sessid"));
        let credentials = Credentials::new("user", "pa\"ss");
        let mut transport = Recorder::default();

        login(&mut transport, &credentials, &Device::default(), &cache).unwrap();

        let steps: Vec<(Method, &str)> = transport
            .requests
            .iter()
            .map(|r| (r.method, r.path.as_str()))
            .collect();
        assert_eq!(
            steps,
            [
                (Method::Post, "/api/dologin"),
                (Method::Post, "/api/seldev"),
                (Method::Get, "/api"),
                (Method::Post, "/api/cmi/read/254"),
                (Method::Post, "/api/selectModule"),
                (Method::Get, "/api/sessionDevice"),
            ]
        );
        assert_eq!(cache.load().as_deref(), Some("fresh"));
    }

    #[test]
    fn login_payloads_are_literal() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SessionCache::new(dir.path().join(".sessid"));
        let mut transport = Recorder::default();

        login(&mut transport, &Credentials::new("user", "pa\"ss"), &Device::default(), &cache).unwrap();

        let bodies: Vec<Option<&str>> = transport.requests.iter().map(|r| r.body.as_deref()).collect();
        assert_eq!(
            bodies,
            [
                Some("{\"username\": \"user\", \"password\": \"pa\\\"ss\"}"),
                Some("{\"dev\":\"/connectedDevices\",\"devSN\":\"mi01_00001403\"}"),
                None,
                Some("[\"CMI__NAME\"]"),
                Some("id=101&devType=19"),
                None,
            ]
        );
        assert!(transport.requests[5]
            .headers
            .contains(&("Referer", "https://ha.kospel.pl/ekd")));
    }

    #[test]
    fn login_body_escapes_non_ascii() {
        assert_eq!(ascii_json("plain").unwrap(), "\"plain\"");
        assert_eq!(ascii_json("zażółć").unwrap(), "\"za\\u017c\\u00f3\\u0142\\u0107\"");
        assert_eq!(ascii_json("🔥\u{7f}").unwrap(), "\"\\ud83d\\udd25\\u007f\"");

        let dir = tempfile::tempdir().unwrap();
        let cache = SessionCache::new(dir.path().join(".sessid"));
        let mut transport = Recorder::default();
        login(&mut transport, &Credentials::new("łukasz", "pass"), &Device::default(), &cache).unwrap();
        assert_eq!(
            transport.requests[0].body.as_deref(),
            Some("{\"username\": \"\\u0142ukasz\", \"password\": \"pass\"}")
        );
    }

    #[test]
    fn failed_login_keeps_cached_session() {
        struct Denied;
        impl Transport for Denied {
            fn send(&mut self, _: Request) -> Result<Response, Error> {
                Ok(Response {
                    status: 403,
                    body: String::new(),
                    session_token: Some("stale".to_string()),
                })
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let cache = SessionCache::new(dir.path().join(".sessid"));
        cache.save("kept");
        login(&mut Denied, &Credentials::new("u", "p"), &Device::default(), &cache).unwrap();
        assert_eq!(cache.load().as_deref(), Some("kept"));
    }

    #[test]
    fn query_targets_module_and_parses_json() {
        let mut transport = Recorder::default();
        let device = Device {
            module_id: 42,
            ..Device::default()
        };
        let payload = query(&mut transport, &device).unwrap();
        assert_eq!(payload["status"], 0);

        let request = &transport.requests[0];
        assert_eq!(request.path, "/api/ekd/read/42");
        assert!(request.headers.contains(&("Accept", ACCEPT_VENDOR)));
    }
}
