/// Message context property keys shared by the dispatch path, the fault
/// handlers and the response path.
pub mod properties {
    pub const RECEIVING_SEQUENCE: &str = "RECEIVING_SEQUENCE";
    pub const DYNAMIC_URL_VALUE: &str = "DYNAMIC_URL_VALUE";
    pub const LAST_ENDPOINT: &str = "last_endpoint";
    pub const BLOCKING_SENDER_ERROR: &str = "blocking.sender.error";
    pub const BLOCKING_MSG_SENDER: &str = "blocking.message.sender";
    pub const LAST_SEQ_FAULT_HANDLER: &str = "LAST_SEQ_FAULT_HANDLER";
    pub const CONTINUATION_CALL: &str = "CONTINUATION_CALL";
    pub const OUT_ONLY: &str = "OUT_ONLY";
    pub const RESPONSE_DISCARDED: &str = "RESPONSE_DISCARDED";

    pub const ERROR_CODE: &str = "ERROR_CODE";
    pub const ERROR_MESSAGE: &str = "ERROR_MESSAGE";
    pub const ERROR_DETAIL: &str = "ERROR_DETAIL";
    pub const ERROR_EXCEPTION: &str = "ERROR_EXCEPTION";
    pub const SENDING_FAULT: &str = "SENDING_FAULT";

    pub const INTERMEDIATE_ORIGINAL_BODY: &str = "_INTERMEDIATE_ORIGINAL_BODY";
    pub const TARGET_FOR_INBOUND_PAYLOAD: &str = "_TARGET_FOR_INBOUND_PAYLOAD";
    pub const ORIGINAL_MESSAGE_TYPE: &str = "_ORIGINAL_MESSAGE_TYPE";
    pub const SOURCE_MESSAGE_TYPE: &str = "_SOURCE_MESSAGE_TYPE";
    pub const IS_SOURCE_AVAILABLE: &str = "_IS_SOURCE_AVAILABLE";
    pub const IS_TARGET_AVAILABLE: &str = "IS_TARGET_AVAILABLE";
    pub const ORIGINAL_TRANSPORT_HEADERS: &str = "_ORIGINAL_TRANSPORT_HEADERS";
    pub const ORIGINAL_CONTENT_TYPE: &str = "_ORIGINAL_CONTENT_TYPE";

    pub const SCATTER_GATHER_CORRELATION_ID: &str = "SCATTER_GATHER_CORRELATION_ID";
    pub const SCATTER_GATHER_BRANCH_INDEX: &str = "SCATTER_GATHER_BRANCH_INDEX";
    pub const SCATTER_GATHER_ASYNC: &str = "SCATTER_GATHER_ASYNC";
    pub const SCATTER_GATHER_PARTIAL: &str = "SCATTER_GATHER_PARTIAL";

    /// Per-call bookkeeping cleared before every dispatch attempt.
    pub const PER_CALL_KEYS: [&str; 5] = [
        RECEIVING_SEQUENCE,
        DYNAMIC_URL_VALUE,
        LAST_ENDPOINT,
        BLOCKING_MSG_SENDER,
        BLOCKING_SENDER_ERROR,
    ];
}

/// Classified error codes attached to `ERROR_CODE`.
pub mod error_codes {
    pub const CONNECTION_FAILED: i32 = 101503;
    pub const TIMEOUT_ERROR: i32 = 101504;
    pub const BLOCKING_CALL_OPERATION_FAILED: i32 = 101508;
    pub const NON_BLOCKING_CALL_OPERATION_FAILED: i32 = 101509;

    pub const DEFAULT_ENDPOINT_SUSPENDED: i32 = 303000;
    pub const ADDRESS_ENDPOINT_SUSPENDED: i32 = 303001;
    pub const WSDL_ENDPOINT_SUSPENDED: i32 = 303002;
}

pub mod content_types {
    pub const JSON: &str = "application/json";
    pub const XML: &str = "application/xml";
    pub const SOAP_XML: &str = "text/xml";
    pub const TEXT: &str = "text/plain";
}

pub mod headers {
    pub const CONTENT_TYPE: &str = "Content-Type";
}
