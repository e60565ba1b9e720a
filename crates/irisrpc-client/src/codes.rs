//! Numeric error codes carried in error responses.

/// Unspecified failure inside a handler or the runtime.
pub const E_INTERNAL_ERROR: i64 = 0x0001;
/// The client is not connected, or the connection dropped while waiting.
pub const E_NOT_CONNECTED: i64 = 0x0002;
/// No response arrived before the call timed out.
pub const E_NO_RESPONSE_YET: i64 = 0x0003;
/// An inbound request could not be parsed.
pub const E_MALFORMATTED_REQUEST: i64 = 0x0004;
/// The addressed instance does not publish the requested function.
pub const E_FUNCTION_NOT_SUPPORTED_BY_INSTANCE: i64 = 0x0005;
/// The peer offered no common message format.
pub const E_NOT_COMPATIBLE: i64 = 0x0006;
/// The TCP connection could not be established.
pub const E_CONNECTION_REFUSED: i64 = 0x0007;
/// `connect` was called on a connected client.
pub const E_ALREADY_CONNECTED: i64 = 0x0008;
/// No instance matches the given id or name.
pub const E_UNKNOWN_INSTANCE_ID: i64 = 0x0009;
/// A file served to the target could not be read.
pub const E_IO_ERROR: i64 = 0x000A;

const NAMES: &[(i64, &str)] = &[
    (E_INTERNAL_ERROR, "E_internal_error"),
    (E_NOT_CONNECTED, "E_not_connected"),
    (E_NO_RESPONSE_YET, "E_no_response_yet"),
    (E_MALFORMATTED_REQUEST, "E_malformatted_request"),
    (
        E_FUNCTION_NOT_SUPPORTED_BY_INSTANCE,
        "E_function_not_supported_by_instance",
    ),
    (E_NOT_COMPATIBLE, "E_not_compatible"),
    (E_CONNECTION_REFUSED, "E_connection_refused"),
    (E_ALREADY_CONNECTED, "E_already_connected"),
    (E_UNKNOWN_INSTANCE_ID, "E_unknown_instance_id"),
    (E_IO_ERROR, "E_io_error"),
];

/// Symbolic name of a known error code.
pub fn code_name(code: i64) -> Option<&'static str> {
    NAMES
        .iter()
        .find(|(known, _)| *known == code)
        .map(|(_, name)| *name)
}

/// Symbolic name, or `E_unknown_code_0x....` for codes this crate does not know.
pub fn describe(code: i64) -> String {
    code_name(code)
        .map(str::to_string)
        .unwrap_or_else(|| format!("E_unknown_code_0x{code:04X}"))
}
