//! # Internal IPC wire protocol
//!
//! The second of the two parallel message taxonomies DESIGN NOTES (§9)
//! calls out: this one travels over the controller↔worker pipe
//! ([`crate::ipc_channel`]) rather than TCP, and is kept as a distinct type
//! from [`crate::common::message`] even though both share the same
//! 128-byte framing, per the note to "keep them distinct and convert at
//! the process-controller boundary". Grounded field-for-field in
//! `original_source/process/runtime/include/praas/process/runtime/internal/ipc/messages.hpp`.
//!
//! One deliberate deviation: the original's `InvocationRequest::buffers`
//! writes a count followed by up to `MAX_BUFFERS = 16` `i32` lengths
//! starting right after the fixed id/name/process_id fields, which would
//! overflow the 128-byte frame (64 bytes of fixed fields + 4 + 16*4 = 132
//! bytes of payload against a 122-byte budget). This port caps
//! `MAX_BUFFERS` at 12, the largest count that fits the frame exactly.

use crate::common::message::{BUF_SIZE, HEADER_OFFSET, ID_LENGTH, NAME_LENGTH};
use crate::error::PraasError;

/// Maximum number of payload buffers an `InvocationRequest` can describe
/// inline; see the module doc for why this isn't the original's 16.
pub const MAX_BUFFERS: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum MessageType {
    GenericHeader = 0,
    GetRequest = 1,
    PutRequest = 2,
    InvocationRequest = 3,
    InvocationResult = 4,
    ApplicationUpdate = 5,
    StateKeysRequest = 6,
    StateKeysResult = 7,
    EndFlag = 8,
}

impl MessageType {
    fn from_i16(value: i16) -> Result<Self, PraasError> {
        match value {
            1 => Ok(MessageType::GetRequest),
            2 => Ok(MessageType::PutRequest),
            3 => Ok(MessageType::InvocationRequest),
            4 => Ok(MessageType::InvocationResult),
            5 => Ok(MessageType::ApplicationUpdate),
            6 => Ok(MessageType::StateKeysRequest),
            7 => Ok(MessageType::StateKeysResult),
            other => Err(PraasError::InvalidMessage(format!(
                "invalid tag value for internal ipc message: {other}"
            ))),
        }
    }
}

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

fn read_field(field: &[u8], max_len: usize) -> String {
    let len = field[..max_len].iter().position(|&b| b == 0).unwrap_or(max_len);
    String::from_utf8_lossy(&field[..len]).into_owned()
}

/// A raw 128-byte internal IPC frame. Same shape as
/// [`crate::common::message::Frame`], kept as a separate type.
#[derive(Debug, Clone)]
pub struct InternalFrame {
    buf: [u8; BUF_SIZE],
}

impl InternalFrame {
    fn new(msg_type: MessageType) -> Self {
        let mut buf = [0u8; BUF_SIZE];
        buf[0..2].copy_from_slice(&(msg_type as i16).to_le_bytes());
        InternalFrame { buf }
    }

    pub fn from_bytes(buf: [u8; BUF_SIZE]) -> Self {
        InternalFrame { buf }
    }

    pub fn as_bytes(&self) -> &[u8; BUF_SIZE] {
        &self.buf
    }

    pub fn message_type(&self) -> Result<MessageType, PraasError> {
        let raw = i16::from_le_bytes([self.buf[0], self.buf[1]]);
        MessageType::from_i16(raw)
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

const GENERIC_PROCID_OFF: usize = 4;
const GENERIC_NAME_OFF: usize = GENERIC_PROCID_OFF + NAME_LENGTH;
const GENERIC_STATE_OFF: usize = GENERIC_NAME_OFF + NAME_LENGTH;

/// Shared shape of `GET_REQUEST` and `PUT_REQUEST`: a data length, the
/// requesting process id, a mailbox/state key name, and a state flag that
/// routes the request to the state table instead of the message table.
#[derive(Debug, Clone)]
pub struct GenericRequest {
    frame: InternalFrame,
}

impl GenericRequest {
    fn new(msg_type: MessageType, process_id: &str, name: &str, data_len: i32, state: bool) -> Result<Self, PraasError> {
        let mut frame = InternalFrame::new(msg_type);
        frame.payload_mut()[0..4].copy_from_slice(&data_len.to_le_bytes());
        write_field(
            &mut frame.payload_mut()[GENERIC_PROCID_OFF..GENERIC_PROCID_OFF + NAME_LENGTH],
            process_id,
            NAME_LENGTH,
        )?;
        write_field(
            &mut frame.payload_mut()[GENERIC_NAME_OFF..GENERIC_NAME_OFF + NAME_LENGTH],
            name,
            NAME_LENGTH,
        )?;
        frame.payload_mut()[GENERIC_STATE_OFF] = state as u8;
        Ok(GenericRequest { frame })
    }

    pub fn data_len(&self) -> i32 {
        i32::from_le_bytes(self.frame.payload()[0..4].try_into().unwrap())
    }

    pub fn process_id(&self) -> String {
        read_field(
            &self.frame.payload()[GENERIC_PROCID_OFF..GENERIC_PROCID_OFF + NAME_LENGTH],
            NAME_LENGTH,
        )
    }

    pub fn name(&self) -> String {
        read_field(
            &self.frame.payload()[GENERIC_NAME_OFF..GENERIC_NAME_OFF + NAME_LENGTH],
            NAME_LENGTH,
        )
    }

    pub fn state(&self) -> bool {
        self.frame.payload()[GENERIC_STATE_OFF] != 0
    }

    pub fn frame(&self) -> &InternalFrame {
        &self.frame
    }

    pub fn into_frame(self) -> InternalFrame {
        self.frame
    }
}

/// A mailbox/state read request.
#[derive(Debug, Clone)]
pub struct GetRequest(GenericRequest);

impl GetRequest {
    pub fn new(process_id: &str, name: &str, state: bool) -> Result<Self, PraasError> {
        Ok(GetRequest(GenericRequest::new(
            MessageType::GetRequest,
            process_id,
            name,
            0,
            state,
        )?))
    }

    pub fn process_id(&self) -> String {
        self.0.process_id()
    }

    pub fn name(&self) -> String {
        self.0.name()
    }

    pub fn state(&self) -> bool {
        self.0.state()
    }

    pub fn frame(&self) -> &InternalFrame {
        self.0.frame()
    }

    pub fn into_frame(self) -> InternalFrame {
        self.0.into_frame()
    }
}

/// A mailbox/state write request; `data_len` bytes of payload follow the
/// header.
#[derive(Debug, Clone)]
pub struct PutRequest(GenericRequest);

impl PutRequest {
    pub fn new(process_id: &str, name: &str, data_len: i32, state: bool) -> Result<Self, PraasError> {
        let mut generic = GenericRequest::new(MessageType::PutRequest, process_id, name, data_len, state)?;
        generic.frame.set_total_length(data_len.max(0) as u32);
        Ok(PutRequest(generic))
    }

    pub fn process_id(&self) -> String {
        self.0.process_id()
    }

    pub fn name(&self) -> String {
        self.0.name()
    }

    pub fn data_len(&self) -> i32 {
        self.0.data_len()
    }

    pub fn state(&self) -> bool {
        self.0.state()
    }

    pub fn frame(&self) -> &InternalFrame {
        self.0.frame()
    }

    pub fn into_frame(self) -> InternalFrame {
        self.0.into_frame()
    }
}

const IR_FNAME_OFF: usize = ID_LENGTH;
const IR_PROCID_OFF: usize = IR_FNAME_OFF + NAME_LENGTH;
const IR_BUFFERS_OFF: usize = IR_PROCID_OFF + ID_LENGTH;

/// An invocation request, naming the function, the invocation id, the
/// requesting process, and the lengths of up to [`MAX_BUFFERS`] payload
/// buffers that follow the header concatenated.
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    frame: InternalFrame,
}

impl InvocationRequest {
    pub fn new(invocation_id: &str, function_name: &str, process_id: &str) -> Result<Self, PraasError> {
        let mut frame = InternalFrame::new(MessageType::InvocationRequest);
        write_field(&mut frame.payload_mut()[0..ID_LENGTH], invocation_id, ID_LENGTH)?;
        write_field(
            &mut frame.payload_mut()[IR_FNAME_OFF..IR_FNAME_OFF + NAME_LENGTH],
            function_name,
            NAME_LENGTH,
        )?;
        write_field(
            &mut frame.payload_mut()[IR_PROCID_OFF..IR_PROCID_OFF + ID_LENGTH],
            process_id,
            ID_LENGTH,
        )?;
        Ok(InvocationRequest { frame })
    }

    pub fn invocation_id(&self) -> String {
        read_field(&self.frame.payload()[0..ID_LENGTH], ID_LENGTH)
    }

    pub fn function_name(&self) -> String {
        read_field(
            &self.frame.payload()[IR_FNAME_OFF..IR_FNAME_OFF + NAME_LENGTH],
            NAME_LENGTH,
        )
    }

    pub fn process_id(&self) -> String {
        read_field(&self.frame.payload()[IR_PROCID_OFF..IR_PROCID_OFF + ID_LENGTH], ID_LENGTH)
    }

    /// Writes the buffer-length table: a count followed by each length,
    /// rejecting a count above [`MAX_BUFFERS`].
    pub fn set_buffer_lengths(&mut self, lengths: &[i32]) -> Result<(), PraasError> {
        if lengths.len() > MAX_BUFFERS {
            return Err(PraasError::InvalidArgument(format!(
                "number of buffers too large: {} > {}",
                lengths.len(),
                MAX_BUFFERS
            )));
        }
        let region = &mut self.frame.payload_mut()[IR_BUFFERS_OFF..];
        region[0..4].copy_from_slice(&(lengths.len() as i32).to_le_bytes());
        for (i, len) in lengths.iter().enumerate() {
            let off = 4 + i * 4;
            region[off..off + 4].copy_from_slice(&len.to_le_bytes());
        }
        Ok(())
    }

    pub fn buffer_count(&self) -> i32 {
        i32::from_le_bytes(self.frame.payload()[IR_BUFFERS_OFF..IR_BUFFERS_OFF + 4].try_into().unwrap())
    }

    pub fn buffer_lengths(&self) -> Vec<i32> {
        let count = self.buffer_count().max(0) as usize;
        (0..count.min(MAX_BUFFERS))
            .map(|i| {
                let off = IR_BUFFERS_OFF + 4 + i * 4;
                i32::from_le_bytes(self.frame.payload()[off..off + 4].try_into().unwrap())
            })
            .collect()
    }

    pub fn frame(&self) -> &InternalFrame {
        &self.frame
    }

    pub fn into_frame(self) -> InternalFrame {
        self.frame
    }
}

const IRS_BUFLEN_OFF: usize = ID_LENGTH;
const IRS_RC_OFF: usize = IRS_BUFLEN_OFF + 4;

/// The result of an invocation, reported back to whichever worker is
/// waiting on `invocation_id`.
#[derive(Debug, Clone)]
pub struct InvocationResult {
    frame: InternalFrame,
}

impl InvocationResult {
    pub fn new(invocation_id: &str, buffer_length: i32, return_code: i32) -> Result<Self, PraasError> {
        let mut frame = InternalFrame::new(MessageType::InvocationResult);
        frame.set_total_length(buffer_length.max(0) as u32);
        write_field(&mut frame.payload_mut()[0..ID_LENGTH], invocation_id, ID_LENGTH)?;
        frame.payload_mut()[IRS_BUFLEN_OFF..IRS_BUFLEN_OFF + 4].copy_from_slice(&buffer_length.to_le_bytes());
        frame.payload_mut()[IRS_RC_OFF..IRS_RC_OFF + 4].copy_from_slice(&return_code.to_le_bytes());
        Ok(InvocationResult { frame })
    }

    pub fn invocation_id(&self) -> String {
        read_field(&self.frame.payload()[0..ID_LENGTH], ID_LENGTH)
    }

    pub fn buffer_length(&self) -> i32 {
        i32::from_le_bytes(self.frame.payload()[IRS_BUFLEN_OFF..IRS_BUFLEN_OFF + 4].try_into().unwrap())
    }

    pub fn return_code(&self) -> i32 {
        i32::from_le_bytes(self.frame.payload()[IRS_RC_OFF..IRS_RC_OFF + 4].try_into().unwrap())
    }

    pub fn frame(&self) -> &InternalFrame {
        &self.frame
    }

    pub fn into_frame(self) -> InternalFrame {
        self.frame
    }
}

/// Informs a worker of a peer's membership/status change.
#[derive(Debug, Clone)]
pub struct ApplicationUpdate {
    frame: InternalFrame,
}

const AU_STATUS_OFF: usize = NAME_LENGTH;

impl ApplicationUpdate {
    pub fn new(process_id: &str, status_change: i32) -> Result<Self, PraasError> {
        let mut frame = InternalFrame::new(MessageType::ApplicationUpdate);
        write_field(&mut frame.payload_mut()[0..NAME_LENGTH], process_id, NAME_LENGTH)?;
        frame.payload_mut()[AU_STATUS_OFF..AU_STATUS_OFF + 4].copy_from_slice(&status_change.to_le_bytes());
        Ok(ApplicationUpdate { frame })
    }

    pub fn process_id(&self) -> String {
        read_field(&self.frame.payload()[0..NAME_LENGTH], NAME_LENGTH)
    }

    pub fn status_change(&self) -> i32 {
        i32::from_le_bytes(self.frame.payload()[AU_STATUS_OFF..AU_STATUS_OFF + 4].try_into().unwrap())
    }

    pub fn frame(&self) -> &InternalFrame {
        &self.frame
    }

    pub fn into_frame(self) -> InternalFrame {
        self.frame
    }
}

/// Requests the mailbox's current `(key, last_modified)` state listing.
#[derive(Debug, Clone)]
pub struct StateKeysRequest {
    frame: InternalFrame,
}

impl StateKeysRequest {
    pub fn new() -> Self {
        StateKeysRequest {
            frame: InternalFrame::new(MessageType::StateKeysRequest),
        }
    }

    pub fn frame(&self) -> &InternalFrame {
        &self.frame
    }

    pub fn into_frame(self) -> InternalFrame {
        self.frame
    }
}

impl Default for StateKeysRequest {
    fn default() -> Self {
        Self::new()
    }
}

/// Carries the serialized `(key, last_modified)` listing as trailing
/// payload of `buffer_length` bytes.
#[derive(Debug, Clone)]
pub struct StateKeysResult {
    frame: InternalFrame,
}

impl StateKeysResult {
    pub fn new(buffer_length: i32) -> Self {
        let mut frame = InternalFrame::new(MessageType::StateKeysResult);
        frame.set_total_length(buffer_length.max(0) as u32);
        frame.payload_mut()[0..4].copy_from_slice(&buffer_length.to_le_bytes());
        StateKeysResult { frame }
    }

    pub fn buffer_length(&self) -> i32 {
        i32::from_le_bytes(self.frame.payload()[0..4].try_into().unwrap())
    }

    pub fn frame(&self) -> &InternalFrame {
        &self.frame
    }

    pub fn into_frame(self) -> InternalFrame {
        self.frame
    }
}

/// Tagged variant over all seven internal IPC messages.
#[derive(Debug, Clone)]
pub enum Message {
    GetRequest(GetRequest),
    PutRequest(PutRequest),
    InvocationRequest(InvocationRequest),
    InvocationResult(InvocationResult),
    ApplicationUpdate(ApplicationUpdate),
    StateKeysRequest(StateKeysRequest),
    StateKeysResult(StateKeysResult),
}

impl Message {
    pub fn parse(frame: InternalFrame) -> Result<Message, PraasError> {
        match frame.message_type()? {
            MessageType::GetRequest => Ok(Message::GetRequest(GetRequest(GenericRequest { frame }))),
            MessageType::PutRequest => Ok(Message::PutRequest(PutRequest(GenericRequest { frame }))),
            MessageType::InvocationRequest => Ok(Message::InvocationRequest(InvocationRequest { frame })),
            MessageType::InvocationResult => Ok(Message::InvocationResult(InvocationResult { frame })),
            MessageType::ApplicationUpdate => Ok(Message::ApplicationUpdate(ApplicationUpdate { frame })),
            MessageType::StateKeysRequest => Ok(Message::StateKeysRequest(StateKeysRequest { frame })),
            MessageType::StateKeysResult => Ok(Message::StateKeysResult(StateKeysResult { frame })),
            MessageType::GenericHeader | MessageType::EndFlag => Err(PraasError::InvalidMessage(
                "generic header / end-flag is not a deliverable internal message".into(),
            )),
        }
    }

    pub fn total_length(&self) -> u32 {
        match self {
            Message::GetRequest(m) => m.frame().total_length(),
            Message::PutRequest(m) => m.frame().total_length(),
            Message::InvocationRequest(m) => m.frame().total_length(),
            Message::InvocationResult(m) => m.frame().total_length(),
            Message::ApplicationUpdate(m) => m.frame().total_length(),
            Message::StateKeysRequest(m) => m.frame().total_length(),
            Message::StateKeysResult(m) => m.frame().total_length(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_request_round_trips() {
        let req = GetRequest::new("proc-0", "my-key", true).unwrap();
        assert_eq!(req.process_id(), "proc-0");
        assert_eq!(req.name(), "my-key");
        assert!(req.state());

        match Message::parse(req.into_frame()).unwrap() {
            Message::GetRequest(parsed) => {
                assert_eq!(parsed.process_id(), "proc-0");
                assert!(parsed.state());
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn put_request_carries_data_len_and_total_length() {
        let req = PutRequest::new("proc-0", "k", 16, false).unwrap();
        assert_eq!(req.data_len(), 16);
        assert_eq!(req.frame().total_length(), 16);
        assert!(!req.state());
    }

    #[test]
    fn invocation_request_round_trips_buffer_lengths() {
        let mut req = InvocationRequest::new("inv-1", "add", "proc-0").unwrap();
        req.set_buffer_lengths(&[4, 8, 12]).unwrap();

        assert_eq!(req.invocation_id(), "inv-1");
        assert_eq!(req.function_name(), "add");
        assert_eq!(req.process_id(), "proc-0");
        assert_eq!(req.buffer_count(), 3);
        assert_eq!(req.buffer_lengths(), vec![4, 8, 12]);
    }

    #[test]
    fn too_many_buffers_is_rejected() {
        let mut req = InvocationRequest::new("inv-1", "add", "proc-0").unwrap();
        let lengths = vec![1; MAX_BUFFERS + 1];
        assert!(matches!(
            req.set_buffer_lengths(&lengths),
            Err(PraasError::InvalidArgument(_))
        ));
    }

    #[test]
    fn invocation_result_round_trips() {
        let result = InvocationResult::new("inv-1", 4, -1).unwrap();
        assert_eq!(result.invocation_id(), "inv-1");
        assert_eq!(result.buffer_length(), 4);
        assert_eq!(result.return_code(), -1);
    }

    #[test]
    fn end_flag_is_rejected() {
        let mut frame = InternalFrame::new(MessageType::GetRequest);
        frame.buf[0..2].copy_from_slice(&(MessageType::EndFlag as i16).to_le_bytes());
        assert!(matches!(frame.message_type(), Err(PraasError::InvalidMessage(_))));
    }
}
