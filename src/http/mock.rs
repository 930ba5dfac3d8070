//! Scripted transport for unit tests: records every request and replays a
//! queue of canned responses.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use async_trait::async_trait;
use bytes::Bytes;
use hyper::StatusCode;

use super::{HttpError, HttpResult, Transport};
use crate::aws::{Request, Response};

pub(crate) fn response(status: u16, headers: &[(&str, &str)], body: &[u8]) -> Response {
    let mut map = BTreeMap::new();
    for (name, value) in headers {
        map.insert(name.to_ascii_lowercase(), value.to_string());
    }
    Response {
        status: StatusCode::from_u16(status).unwrap(),
        headers: map,
        body: Bytes::copy_from_slice(body),
    }
}

#[derive(Default)]
struct Shared {
    requests: Vec<Request>,
    responses: VecDeque<HttpResult<Response>>,
}

/// Clones share the same request log and response queue, so a test can keep
/// a handle while the client owns the transport.
#[derive(Clone, Default)]
pub(crate) struct MockTransport {
    shared: Rc<RefCell<Shared>>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_response(&self, resp: Response) {
        self.shared.borrow_mut().responses.push_back(Ok(resp));
    }

    pub(crate) fn push_status(&self, status: u16, body: &[u8]) {
        self.push_response(response(status, &[], body));
    }

    pub(crate) fn push_error(&self, err: HttpError) {
        self.shared.borrow_mut().responses.push_back(Err(err));
    }

    pub(crate) fn requests(&self) -> Vec<Request> {
        self.shared.borrow().requests.clone()
    }

    pub(crate) fn request_count(&self) -> usize {
        self.shared.borrow().requests.len()
    }
}

#[async_trait(?Send)]
impl Transport for MockTransport {
    async fn roundtrip(&mut self, req: &Request) -> HttpResult<Response> {
        let mut shared = self.shared.borrow_mut();
        shared.requests.push(req.clone());
        shared
            .responses
            .pop_front()
            .unwrap_or_else(|| Ok(response(200, &[], b"")))
    }
}
