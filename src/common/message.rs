//! # Wire message framing
//!
//! Every frame exchanged over the process TCP surface (§4.10) — and, with
//! the same layout, the per-worker IPC surface (§4.2, see
//! [`crate::ipc_proto`]) — is exactly [`BUF_SIZE`] bytes: a 2-byte tag, a
//! 4-byte little-endian total payload length, and a tag-specific region.
//! Receivers always read the fixed header first, then exactly
//! `total_length` trailing payload bytes; partial headers are never
//! supported, matching the framing rule in the architecture doc.
//!
//! This module treats the frame as a typed view rather than modelling each
//! tag as its own owned struct with duplicated storage: a [`Frame`] is a
//! plain byte array, and each message kind is a thin accessor wrapper over
//! it. This mirrors the `Message<Data, CRTPMessageType>` layout in the
//! praas C++ prototype, translated into borrow-checked Rust instead of
//! reinterpret_cast.

use crate::error::PraasError;

/// Total size of a wire frame, header included.
pub const BUF_SIZE: usize = 128;
/// Offset at which the tag-specific payload region begins.
pub const HEADER_OFFSET: usize = 6;
/// Maximum length of a name field (process names, function names, mailbox keys).
pub const NAME_LENGTH: usize = 32;
/// Maximum length of an id field (invocation ids, process ids).
pub const ID_LENGTH: usize = 16;
/// Maximum length of a swap location path.
pub const PATH_LENGTH: usize = 64;

/// The nine message kinds carried over the wire, plus the two sentinel
/// values (`GenericHeader`, `EndFlag`) that bound the valid tag range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum MessageTag {
    GenericHeader = 0,
    ProcessConnection = 1,
    SwapRequest = 2,
    SwapConfirmation = 3,
    InvocationRequest = 4,
    InvocationResult = 5,
    DataplaneMetrics = 6,
    ProcessClosure = 7,
    ApplicationUpdate = 8,
    PutMessage = 9,
    EndFlag = 10,
}

impl MessageTag {
    fn from_i16(value: i16) -> Result<Self, PraasError> {
        match value {
            1 => Ok(MessageTag::ProcessConnection),
            2 => Ok(MessageTag::SwapRequest),
            3 => Ok(MessageTag::SwapConfirmation),
            4 => Ok(MessageTag::InvocationRequest),
            5 => Ok(MessageTag::InvocationResult),
            6 => Ok(MessageTag::DataplaneMetrics),
            7 => Ok(MessageTag::ProcessClosure),
            8 => Ok(MessageTag::ApplicationUpdate),
            9 => Ok(MessageTag::PutMessage),
            other => Err(PraasError::InvalidMessage(format!(
                "invalid tag value for wire message: {other}"
            ))),
        }
    }
}

/// Writes `value` into `field[..max_len]`, zero-padding the remainder.
/// Fails with [`PraasError::InvalidArgument`] when `value` overflows the slot.
fn write_field(field: &mut [u8], value: &str, max_len: usize) -> Result<(), PraasError> {
    if value.len() > max_len {
        return Err(PraasError::InvalidArgument(format!(
            "value too long: {} > {}",
            value.len(),
            max_len
        )));
    }
    field[..max_len].fill(0);
    field[..value.len()].copy_from_slice(value.as_bytes());
    Ok(())
}

/// Reads a NUL-terminated (or slot-filling) string out of a fixed field.
fn read_field(field: &[u8], max_len: usize) -> String {
    let len = field[..max_len]
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(max_len);
    String::from_utf8_lossy(&field[..len]).into_owned()
}

/// A raw, fully-owned 128-byte wire frame.
///
/// `Frame` is move-only storage; the typed wrappers below borrow it
/// mutably or immutably to expose named fields without copying.
#[derive(Debug, Clone)]
pub struct Frame {
    buf: [u8; BUF_SIZE],
}

impl Frame {
    fn new(tag: MessageTag) -> Self {
        let mut buf = [0u8; BUF_SIZE];
        buf[0..2].copy_from_slice(&(tag as i16).to_le_bytes());
        Frame { buf }
    }

    /// Wraps an already-received frame for parsing. Does not validate the
    /// tag eagerly — call [`Frame::tag`] or [`Message::parse`] to do so.
    pub fn from_bytes(buf: [u8; BUF_SIZE]) -> Self {
        Frame { buf }
    }

    pub fn as_bytes(&self) -> &[u8; BUF_SIZE] {
        &self.buf
    }

    pub fn tag(&self) -> Result<MessageTag, PraasError> {
        let raw = i16::from_le_bytes([self.buf[0], self.buf[1]]);
        MessageTag::from_i16(raw)
    }

    pub fn total_length(&self) -> u32 {
        u32::from_le_bytes([self.buf[2], self.buf[3], self.buf[4], self.buf[5]])
    }

    pub fn set_total_length(&mut self, len: u32) {
        self.buf[2..6].copy_from_slice(&len.to_le_bytes());
    }

    fn payload(&self) -> &[u8] {
        &self.buf[HEADER_OFFSET..]
    }

    fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.buf[HEADER_OFFSET..]
    }
}

/// First frame on any connection: names the peer (`DATAPLANE`,
/// `CONTROLPLANE`, or a concrete process id).
#[derive(Debug, Clone)]
pub struct ProcessConnection(Frame);

impl ProcessConnection {
    pub fn new(peer_name: &str) -> Result<Self, PraasError> {
        let mut frame = Frame::new(MessageTag::ProcessConnection);
        write_field(&mut frame.payload_mut()[0..NAME_LENGTH], peer_name, NAME_LENGTH)?;
        Ok(ProcessConnection(frame))
    }

    pub fn peer_name(&self) -> String {
        read_field(&self.0.payload()[0..NAME_LENGTH], NAME_LENGTH)
    }

    pub fn frame(&self) -> &Frame {
        &self.0
    }

    pub fn into_frame(self) -> Frame {
        self.0
    }
}

/// Control-plane request to swap a process out to `path`.
#[derive(Debug, Clone)]
pub struct SwapRequest(Frame);

impl SwapRequest {
    pub fn new(path: &str) -> Result<Self, PraasError> {
        let mut frame = Frame::new(MessageTag::SwapRequest);
        write_field(&mut frame.payload_mut()[0..PATH_LENGTH], path, PATH_LENGTH)?;
        Ok(SwapRequest(frame))
    }

    pub fn path(&self) -> String {
        read_field(&self.0.payload()[0..PATH_LENGTH], PATH_LENGTH)
    }

    pub fn frame(&self) -> &Frame {
        &self.0
    }

    pub fn into_frame(self) -> Frame {
        self.0
    }
}

/// Reply to a [`SwapRequest`] once swap-out has completed.
#[derive(Debug, Clone)]
pub struct SwapConfirmation(Frame);

impl SwapConfirmation {
    pub fn new(swap_size: i32, swap_time_ms: f64) -> Self {
        let mut frame = Frame::new(MessageTag::SwapConfirmation);
        frame.payload_mut()[0..4].copy_from_slice(&swap_size.to_le_bytes());
        frame.payload_mut()[4..12].copy_from_slice(&swap_time_ms.to_le_bytes());
        SwapConfirmation(frame)
    }

    pub fn swap_size(&self) -> i32 {
        i32::from_le_bytes(self.0.payload()[0..4].try_into().unwrap())
    }

    pub fn swap_time_ms(&self) -> f64 {
        f64::from_le_bytes(self.0.payload()[4..12].try_into().unwrap())
    }

    pub fn frame(&self) -> &Frame {
        &self.0
    }

    pub fn into_frame(self) -> Frame {
        self.0
    }
}

/// Request to invoke a function, optionally carrying `total_length` bytes
/// of payload immediately following the header.
#[derive(Debug, Clone)]
pub struct InvocationRequest(Frame);

const IR_FNAME_OFF: usize = 4;
const IR_ID_OFF: usize = IR_FNAME_OFF + NAME_LENGTH;

impl InvocationRequest {
    pub fn new(
        function_name: &str,
        invocation_id: &str,
        payload_size: i32,
    ) -> Result<Self, PraasError> {
        if payload_size < 0 {
            return Err(PraasError::InvalidArgument(format!(
                "payload size too small: {payload_size}"
            )));
        }
        let mut frame = Frame::new(MessageTag::InvocationRequest);
        frame.set_total_length(payload_size as u32);
        frame.payload_mut()[0..4].copy_from_slice(&payload_size.to_le_bytes());
        write_field(
            &mut frame.payload_mut()[IR_FNAME_OFF..IR_FNAME_OFF + NAME_LENGTH],
            function_name,
            NAME_LENGTH,
        )?;
        write_field(
            &mut frame.payload_mut()[IR_ID_OFF..IR_ID_OFF + ID_LENGTH],
            invocation_id,
            ID_LENGTH,
        )?;
        Ok(InvocationRequest(frame))
    }

    pub fn function_name(&self) -> String {
        read_field(
            &self.0.payload()[IR_FNAME_OFF..IR_FNAME_OFF + NAME_LENGTH],
            NAME_LENGTH,
        )
    }

    pub fn invocation_id(&self) -> String {
        read_field(&self.0.payload()[IR_ID_OFF..IR_ID_OFF + ID_LENGTH], ID_LENGTH)
    }

    pub fn payload_size(&self) -> i32 {
        i32::from_le_bytes(self.0.payload()[0..4].try_into().unwrap())
    }

    pub fn frame(&self) -> &Frame {
        &self.0
    }

    pub fn into_frame(self) -> Frame {
        self.0
    }
}

/// Reply to an [`InvocationRequest`]; `return_code < 0` means the trailing
/// payload is an error message rather than a function result.
#[derive(Debug, Clone)]
pub struct InvocationResult(Frame);

const IRS_ID_OFF: usize = 4;

impl InvocationResult {
    pub fn new(invocation_id: &str, return_code: i32, payload_size: i32) -> Result<Self, PraasError> {
        let mut frame = Frame::new(MessageTag::InvocationResult);
        frame.set_total_length(payload_size.max(0) as u32);
        frame.payload_mut()[0..4].copy_from_slice(&return_code.to_le_bytes());
        write_field(
            &mut frame.payload_mut()[IRS_ID_OFF..IRS_ID_OFF + ID_LENGTH],
            invocation_id,
            ID_LENGTH,
        )?;
        Ok(InvocationResult(frame))
    }

    pub fn invocation_id(&self) -> String {
        read_field(&self.0.payload()[IRS_ID_OFF..IRS_ID_OFF + ID_LENGTH], ID_LENGTH)
    }

    pub fn return_code(&self) -> i32 {
        i32::from_le_bytes(self.0.payload()[0..4].try_into().unwrap())
    }

    pub fn frame(&self) -> &Frame {
        &self.0
    }

    pub fn into_frame(self) -> Frame {
        self.0
    }
}

/// Periodic process -> control-plane metrics report.
#[derive(Debug, Clone)]
pub struct DataplaneMetrics(Frame);

impl DataplaneMetrics {
    pub fn new(invocations: i32, computation_time: i32, last_invocation_ts: u64) -> Result<Self, PraasError> {
        if invocations < 0 {
            return Err(PraasError::InvalidArgument(format!(
                "incorrect number of invocations {invocations}"
            )));
        }
        if computation_time < 0 {
            return Err(PraasError::InvalidArgument(format!(
                "incorrect computation time {computation_time}"
            )));
        }
        let mut frame = Frame::new(MessageTag::DataplaneMetrics);
        frame.payload_mut()[0..4].copy_from_slice(&invocations.to_le_bytes());
        frame.payload_mut()[4..8].copy_from_slice(&computation_time.to_le_bytes());
        frame.payload_mut()[8..16].copy_from_slice(&last_invocation_ts.to_le_bytes());
        Ok(DataplaneMetrics(frame))
    }

    pub fn invocations(&self) -> i32 {
        i32::from_le_bytes(self.0.payload()[0..4].try_into().unwrap())
    }

    pub fn computation_time(&self) -> i32 {
        i32::from_le_bytes(self.0.payload()[4..8].try_into().unwrap())
    }

    pub fn last_invocation_timestamp(&self) -> u64 {
        u64::from_le_bytes(self.0.payload()[8..16].try_into().unwrap())
    }

    pub fn frame(&self) -> &Frame {
        &self.0
    }

    pub fn into_frame(self) -> Frame {
        self.0
    }
}

/// Graceful-shutdown announcement; carries no fields.
#[derive(Debug, Clone)]
pub struct ProcessClosure(Frame);

impl ProcessClosure {
    pub fn new() -> Self {
        ProcessClosure(Frame::new(MessageTag::ProcessClosure))
    }

    pub fn frame(&self) -> &Frame {
        &self.0
    }

    pub fn into_frame(self) -> Frame {
        self.0
    }
}

impl Default for ProcessClosure {
    fn default() -> Self {
        Self::new()
    }
}

/// Informs a process of a peer's membership/address change.
#[derive(Debug, Clone)]
pub struct ApplicationUpdate(Frame);

const AU_IP_OFF: usize = NAME_LENGTH;
const AU_STATUS_OFF: usize = AU_IP_OFF + ID_LENGTH;
const AU_PORT_OFF: usize = AU_STATUS_OFF + 4;

impl ApplicationUpdate {
    pub fn new(
        process_id: &str,
        ip_address: &str,
        status_change: i32,
        port: i32,
    ) -> Result<Self, PraasError> {
        let mut frame = Frame::new(MessageTag::ApplicationUpdate);
        write_field(&mut frame.payload_mut()[0..NAME_LENGTH], process_id, NAME_LENGTH)?;
        write_field(
            &mut frame.payload_mut()[AU_IP_OFF..AU_IP_OFF + ID_LENGTH],
            ip_address,
            ID_LENGTH,
        )?;
        frame.payload_mut()[AU_STATUS_OFF..AU_STATUS_OFF + 4]
            .copy_from_slice(&status_change.to_le_bytes());
        frame.payload_mut()[AU_PORT_OFF..AU_PORT_OFF + 4].copy_from_slice(&port.to_le_bytes());
        Ok(ApplicationUpdate(frame))
    }

    pub fn process_id(&self) -> String {
        read_field(&self.0.payload()[0..NAME_LENGTH], NAME_LENGTH)
    }

    pub fn ip_address(&self) -> String {
        read_field(&self.0.payload()[AU_IP_OFF..AU_IP_OFF + ID_LENGTH], ID_LENGTH)
    }

    pub fn status_change(&self) -> i32 {
        i32::from_le_bytes(
            self.0.payload()[AU_STATUS_OFF..AU_STATUS_OFF + 4]
                .try_into()
                .unwrap(),
        )
    }

    pub fn port(&self) -> i32 {
        i32::from_le_bytes(self.0.payload()[AU_PORT_OFF..AU_PORT_OFF + 4].try_into().unwrap())
    }

    pub fn frame(&self) -> &Frame {
        &self.0
    }

    pub fn into_frame(self) -> Frame {
        self.0
    }
}

/// One-way mailbox write, targeting either a message slot or (when `is_state`
/// is conveyed by the caller via the empty-source convention) the state
/// table; see [`crate::mailbox`] for the state-vs-message distinction.
#[derive(Debug, Clone)]
pub struct PutMessage(Frame);

const PM_PROCID_OFF: usize = NAME_LENGTH;

impl PutMessage {
    pub fn new(name: &str, source_process_id: &str, payload_size: i32) -> Result<Self, PraasError> {
        let mut frame = Frame::new(MessageTag::PutMessage);
        frame.set_total_length(payload_size.max(0) as u32);
        write_field(&mut frame.payload_mut()[0..NAME_LENGTH], name, NAME_LENGTH)?;
        write_field(
            &mut frame.payload_mut()[PM_PROCID_OFF..PM_PROCID_OFF + NAME_LENGTH],
            source_process_id,
            NAME_LENGTH,
        )?;
        Ok(PutMessage(frame))
    }

    pub fn name(&self) -> String {
        read_field(&self.0.payload()[0..NAME_LENGTH], NAME_LENGTH)
    }

    pub fn source_process_id(&self) -> String {
        read_field(
            &self.0.payload()[PM_PROCID_OFF..PM_PROCID_OFF + NAME_LENGTH],
            NAME_LENGTH,
        )
    }

    pub fn frame(&self) -> &Frame {
        &self.0
    }

    pub fn into_frame(self) -> Frame {
        self.0
    }
}

/// Tagged variant over all nine wire messages, returned by [`Message::parse`].
#[derive(Debug, Clone)]
pub enum Message {
    ProcessConnection(ProcessConnection),
    SwapRequest(SwapRequest),
    SwapConfirmation(SwapConfirmation),
    InvocationRequest(InvocationRequest),
    InvocationResult(InvocationResult),
    DataplaneMetrics(DataplaneMetrics),
    ProcessClosure(ProcessClosure),
    ApplicationUpdate(ApplicationUpdate),
    PutMessage(PutMessage),
}

impl Message {
    /// Parses a raw frame into its tagged variant, rejecting tag values
    /// outside the declared range with [`PraasError::InvalidMessage`].
    pub fn parse(frame: Frame) -> Result<Message, PraasError> {
        match frame.tag()? {
            MessageTag::ProcessConnection => Ok(Message::ProcessConnection(ProcessConnection(frame))),
            MessageTag::SwapRequest => Ok(Message::SwapRequest(SwapRequest(frame))),
            MessageTag::SwapConfirmation => Ok(Message::SwapConfirmation(SwapConfirmation(frame))),
            MessageTag::InvocationRequest => Ok(Message::InvocationRequest(InvocationRequest(frame))),
            MessageTag::InvocationResult => Ok(Message::InvocationResult(InvocationResult(frame))),
            MessageTag::DataplaneMetrics => Ok(Message::DataplaneMetrics(DataplaneMetrics(frame))),
            MessageTag::ProcessClosure => Ok(Message::ProcessClosure(ProcessClosure(frame))),
            MessageTag::ApplicationUpdate => Ok(Message::ApplicationUpdate(ApplicationUpdate(frame))),
            MessageTag::PutMessage => Ok(Message::PutMessage(PutMessage(frame))),
            MessageTag::GenericHeader | MessageTag::EndFlag => Err(PraasError::InvalidMessage(
                "generic header / end-flag is not a deliverable message".into(),
            )),
        }
    }

    pub fn total_length(&self) -> u32 {
        self.as_frame().total_length()
    }

    pub fn as_frame(&self) -> &Frame {
        match self {
            Message::ProcessConnection(m) => m.frame(),
            Message::SwapRequest(m) => m.frame(),
            Message::SwapConfirmation(m) => m.frame(),
            Message::InvocationRequest(m) => m.frame(),
            Message::InvocationResult(m) => m.frame(),
            Message::DataplaneMetrics(m) => m.frame(),
            Message::ProcessClosure(m) => m.frame(),
            Message::ApplicationUpdate(m) => m.frame(),
            Message::PutMessage(m) => m.frame(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_connection_round_trips() {
        let name = "a".repeat(NAME_LENGTH);
        let msg = ProcessConnection::new(&name).unwrap();
        assert_eq!(msg.peer_name(), name);

        let parsed = Message::parse(msg.into_frame()).unwrap();
        match parsed {
            Message::ProcessConnection(p) => assert_eq!(p.peer_name(), name),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn name_longer_than_slot_is_rejected() {
        let name = "a".repeat(NAME_LENGTH + 1);
        assert!(matches!(
            ProcessConnection::new(&name),
            Err(PraasError::InvalidArgument(_))
        ));
    }

    #[test]
    fn id_exactly_at_limit_succeeds() {
        let id = "i".repeat(ID_LENGTH);
        let msg = InvocationResult::new(&id, 0, 0).unwrap();
        assert_eq!(msg.invocation_id(), id);
    }

    #[test]
    fn invocation_request_round_trip_with_payload_size() {
        let msg = InvocationRequest::new("hello-world", "inv-1", 42).unwrap();
        assert_eq!(msg.function_name(), "hello-world");
        assert_eq!(msg.invocation_id(), "inv-1");
        assert_eq!(msg.payload_size(), 42);
        assert_eq!(msg.frame().total_length(), 42);
    }

    #[test]
    fn negative_payload_size_is_rejected() {
        assert!(matches!(
            InvocationRequest::new("f", "i", -1),
            Err(PraasError::InvalidArgument(_))
        ));
    }

    #[test]
    fn application_update_round_trips_all_fields() {
        let msg = ApplicationUpdate::new("proc-0", "127.0.0.1", 2, 9000).unwrap();
        assert_eq!(msg.process_id(), "proc-0");
        assert_eq!(msg.ip_address(), "127.0.0.1");
        assert_eq!(msg.status_change(), 2);
        assert_eq!(msg.port(), 9000);
    }

    #[test]
    fn put_message_round_trips() {
        let msg = PutMessage::new("key", "proc-a", 10).unwrap();
        assert_eq!(msg.name(), "key");
        assert_eq!(msg.source_process_id(), "proc-a");
    }

    #[test]
    fn end_flag_tag_is_rejected() {
        let mut frame = Frame::new(MessageTag::ProcessConnection);
        frame.buf[0..2].copy_from_slice(&(MessageTag::EndFlag as i16).to_le_bytes());
        assert!(matches!(frame.tag(), Err(PraasError::InvalidMessage(_))));
    }

    #[test]
    fn full_frame_is_exactly_buf_size_bytes() {
        let msg = ProcessClosure::new();
        assert_eq!(msg.frame().as_bytes().len(), BUF_SIZE);
    }
}
