//! Response classification.
//!
//! The service reports failures inside a `200 OK` body, so a response is an
//! application error whenever the marker appears anywhere in its raw text.
//! This matches payload data containing the word too; that false-positive risk
//! is accepted for compatibility with the service's response shape.

/// Substring whose presence marks a service-reported error.
pub const ERROR_MARKER: &[u8] = b"error";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    Success,
    ApplicationError,
}

pub fn classify_response(raw: &[u8]) -> ResponseClass {
    if raw
        .windows(ERROR_MARKER.len())
        .any(|window| window == ERROR_MARKER)
    {
        ResponseClass::ApplicationError
    } else {
        ResponseClass::Success
    }
}
