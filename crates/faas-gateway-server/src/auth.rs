use crate::error::ApiError;
use axum::http::HeaderMap;
use dashmap::DashMap;
use faas_common::Authorizer;
use std::collections::{BTreeMap, HashSet};

/// Header carrying the caller identity on every invocation.
pub const CALLER_HEADER: &str = "x-user-id";

pub fn caller_identity(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get(CALLER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|caller| !caller.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::bad_request(format!("Missing {CALLER_HEADER} header")))
}

/// Allow-list of caller to function. Anything not listed is denied.
#[derive(Debug, Default)]
pub struct PermissionManager {
    allowed: DashMap<String, HashSet<String>>,
}

impl PermissionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(permissions: &BTreeMap<String, Vec<String>>) -> Self {
        let manager = Self::new();
        for (caller, functions) in permissions {
            for function in functions {
                manager.allow(caller, function);
            }
        }
        manager
    }

    pub fn allow(&self, caller: &str, function: &str) {
        self.allowed
            .entry(caller.to_string())
            .or_default()
            .insert(function.to_string());
    }
}

impl Authorizer for PermissionManager {
    fn is_allowed(&self, caller: &str, function: &str) -> bool {
        self.allowed
            .get(caller)
            .is_some_and(|functions| functions.contains(function))
    }
}
