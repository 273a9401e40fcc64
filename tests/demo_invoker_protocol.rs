//! Drives the real `praas-demo-invoker` binary as a subprocess over its
//! actual IPC pipes, the way `praas-controller`'s worker pool does, for
//! the functions whose protocol doesn't require a full controller to
//! referee a second hop (spec.md §8 scenarios 1-3, 5).

use std::io::Write;
use std::process::{Child, Command, Stdio};

use praas::ipc_channel::blocking::{receive_blocking, send_blocking};
use praas::ipc_proto::{InvocationRequest, Message as IpcMessage, PutRequest};

struct Invoker {
    child: Child,
}

impl Invoker {
    fn spawn() -> Self {
        let exe = env!("CARGO_BIN_EXE_praas-demo-invoker");
        let child = Command::new(exe)
            .arg("--worker")
            .env("PRAAS_PROCESS_ID", "test-process")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .expect("failed to spawn praas-demo-invoker");
        Invoker { child }
    }

    fn stdin(&mut self) -> &mut std::process::ChildStdin {
        self.child.stdin.as_mut().unwrap()
    }

    fn stdout(&mut self) -> &mut std::process::ChildStdout {
        self.child.stdout.as_mut().unwrap()
    }

    fn invoke(&mut self, function_name: &str, buffers: &[&[u8]]) -> (i32, Vec<u8>) {
        let invocation_id = "0123456789abcdef";
        let mut request = InvocationRequest::new(invocation_id, function_name, "test-process").unwrap();
        let lengths: Vec<i32> = buffers.iter().map(|b| b.len() as i32).collect();
        request.set_buffer_lengths(&lengths).unwrap();

        let mut payload = Vec::new();
        for b in buffers {
            payload.extend_from_slice(b);
        }

        let mut frame = request.into_frame();
        frame.set_total_length(payload.len() as u32);
        {
            let stdin = self.stdin();
            send_blocking(stdin, &frame, &payload).unwrap();
            stdin.flush().unwrap();
        }

        let (header, reply_payload) = receive_blocking(self.stdout()).unwrap().expect("worker closed its pipe");
        match IpcMessage::parse(header).unwrap() {
            IpcMessage::InvocationResult(result) => {
                assert_eq!(result.invocation_id(), invocation_id);
                (result.return_code(), reply_payload.into_vec())
            }
            other => panic!("expected an invocation result, got {other:?}"),
        }
    }
}

impl Drop for Invoker {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[test]
fn hello_world_returns_the_fixed_greeting() {
    let mut invoker = Invoker::spawn();
    let (return_code, result) = invoker.invoke("hello-world", &[]);
    assert_eq!(return_code, 0);
    assert_eq!(result, b"Hello, world!");
}

#[test]
fn add_sums_two_little_endian_integers() {
    let mut invoker = Invoker::spawn();
    let a = 17i32.to_le_bytes();
    let b = 25i32.to_le_bytes();
    let (return_code, result) = invoker.invoke("add", &[&a, &b]);
    assert_eq!(return_code, 0);
    assert_eq!(i32::from_le_bytes(result.try_into().unwrap()), 42);
}

#[test]
fn unknown_function_name_fails_without_killing_the_worker() {
    let mut invoker = Invoker::spawn();
    let (return_code, _) = invoker.invoke("does-not-exist", &[]);
    assert_eq!(return_code, -1);

    // The pipe is still alive; a subsequent well-formed invocation works.
    let a = 1i32.to_le_bytes();
    let b = 2i32.to_le_bytes();
    let (return_code, result) = invoker.invoke("add", &[&a, &b]);
    assert_eq!(return_code, 0);
    assert_eq!(i32::from_le_bytes(result.try_into().unwrap()), 3);
}

/// `send_message`/`get_message_self` each issue their own
/// `GetRequest`/`PutRequest` frame to what they believe is the
/// controller; this test plays controller just enough to answer them,
/// exercising the mailbox half of the demo functions without needing the
/// whole process controller running (spec.md §8 scenario 5).
#[test]
fn get_message_self_receives_the_harness_supplied_value() {
    let mut invoker = Invoker::spawn();
    let invocation_id = "fedcba9876543210";
    let name = b"greeting";
    let value = b"stored-value";

    let mut request = InvocationRequest::new(invocation_id, "get_message_self", "test-process").unwrap();
    request.set_buffer_lengths(&[name.len() as i32]).unwrap();
    let mut frame = request.into_frame();
    frame.set_total_length(name.len() as u32);
    {
        let stdin = invoker.stdin();
        send_blocking(stdin, &frame, name).unwrap();
        stdin.flush().unwrap();
    }

    // The worker's GET_REQUEST for the mailbox entry.
    let (header, _) = receive_blocking(invoker.stdout()).unwrap().expect("worker closed its pipe");
    let get = match IpcMessage::parse(header).unwrap() {
        IpcMessage::GetRequest(req) => req,
        other => panic!("expected a GET_REQUEST, got {other:?}"),
    };
    assert_eq!(get.name(), "greeting");

    // Answer as the controller would: a PUT_REQUEST carrying the value.
    let reply = PutRequest::new(&get.process_id(), &get.name(), value.len() as i32, get.state()).unwrap();
    {
        let stdin = invoker.stdin();
        send_blocking(stdin, reply.frame(), value).unwrap();
        stdin.flush().unwrap();
    }

    let (header, payload) = receive_blocking(invoker.stdout()).unwrap().expect("worker closed its pipe");
    match IpcMessage::parse(header).unwrap() {
        IpcMessage::InvocationResult(result) => {
            assert_eq!(result.invocation_id(), invocation_id);
            assert_eq!(result.return_code(), 0);
            assert_eq!(payload.as_slice(), value);
        }
        other => panic!("expected an invocation result, got {other:?}"),
    }
}

