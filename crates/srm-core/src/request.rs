// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Decoded requests as handed over by the dispatcher, and the responses the
// entity handlers produce.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, SrmError};
use crate::result::ResultCode;
use crate::types::{Permission, ServiceType, Subject, WILDCARD};

/// REST-style request kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    Get,
    Put,
    Post,
    Delete,
}

impl Method {
    /// The CRUDN bit an ACE must grant for this method (PUT creates, POST
    /// updates).
    pub fn permission(&self) -> Permission {
        match self {
            Self::Get => Permission::RETRIEVE,
            Self::Put => Permission::CREATE,
            Self::Post => Permission::UPDATE,
            Self::Delete => Permission::DELETE,
        }
    }

    pub fn is_mutating(&self) -> bool {
        !matches!(self, Self::Get)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Get => "GET",
            Self::Put => "PUT",
            Self::Post => "POST",
            Self::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// Filters carried in the request URI query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pub subject: Option<Subject>,
    pub href: Option<String>,
    pub owner: Option<Uuid>,
    pub service_type: Option<ServiceType>,
}

impl Query {
    /// Parse `key=value` pairs separated by `;` or `&`.
    ///
    /// Recognised keys: `subjectuuid`, `href`, `ownr`, `svct`. Interface and
    /// resource-type selectors (`if`, `rt`) are the dispatcher's business and
    /// are skipped along with any other key.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut query = Self::default();
        for pair in raw.split([';', '&']).filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| SrmError::InvalidQuery(format!("`{pair}` is not key=value")))?;
            match key {
                "subjectuuid" => {
                    query.subject = Some(if value == WILDCARD {
                        Subject::Anyone
                    } else {
                        Subject::Uuid(parse_uuid(key, value)?)
                    });
                }
                "href" => query.href = Some(value.to_owned()),
                "ownr" => query.owner = Some(parse_uuid(key, value)?),
                "svct" => {
                    let code = value
                        .parse::<u16>()
                        .map_err(|_| SrmError::InvalidQuery(format!("svct `{value}` is not a number")))?;
                    query.service_type = Some(ServiceType::from_code(code));
                }
                _ => {}
            }
        }
        Ok(query)
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn parse_uuid(key: &str, value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| SrmError::InvalidQuery(format!("{key}: {e}")))
}

/// A request already authenticated by the transport session.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    /// Identity of the peer; `Subject::Anyone` for unauthenticated sessions.
    pub requester: Subject,
    pub query: Query,
    /// Raw CBOR body; empty for GET and DELETE.
    pub payload: Vec<u8>,
}

impl Request {
    pub fn new(method: Method, requester: Subject) -> Self {
        Self {
            method,
            requester,
            query: Query::default(),
            payload: Vec::new(),
        }
    }

    pub fn get(requester: Subject) -> Self {
        Self::new(Method::Get, requester)
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_query(mut self, query: Query) -> Self {
        self.query = query;
        self
    }
}

/// What an entity handler hands back to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub result: ResultCode,
    /// CBOR representation of the resource after the request, if any.
    pub payload: Option<Vec<u8>>,
}

impl Response {
    pub fn ok(payload: Option<Vec<u8>>) -> Self {
        Self {
            result: ResultCode::Ok,
            payload,
        }
    }

    pub fn from_error(err: &SrmError) -> Self {
        Self {
            result: ResultCode::from(err),
            payload: None,
        }
    }
}

impl From<Result<Option<Vec<u8>>>> for Response {
    fn from(outcome: Result<Option<Vec<u8>>>) -> Self {
        match outcome {
            Ok(payload) => Self::ok(payload),
            Err(err) => Self::from_error(&err),
        }
    }
}
