//! `praas-demo-invoker`: the function worker binary (§4.17).
//!
//! Hosts the six demo functions named in spec.md §8 as one statically
//! linked binary instead of the original's per-language shared objects
//! (`original_source/examples/hello-world-cpp/hello_world.cpp`,
//! `benchmarks/functions/cpp/functions.cpp`): `hello-world`, `add`,
//! `power` (local recursive self-invocation,
//! `original_source/tests/integration/local_invocation.cpp`),
//! `send_message`/`get_message_self` (mailbox put/get), and
//! `remote_invocation` (invokes `add` on a named peer and doubles the
//! result, spec.md §8 scenario 6).
//!
//! Runs as a single-threaded subprocess with no tokio runtime of its own
//! (§5), communicating over piped stdin/stdout using
//! [`praas::ipc_channel::blocking`] and [`praas::ipc_proto`]. Stdout is the
//! wire to the controller, so all logging goes to stderr.

use std::io::{self, Read, Write};

use clap::Parser;
use uuid::Uuid;

use praas::ipc_channel::blocking::{receive_blocking, send_blocking};
use praas::ipc_proto::{self, InvocationRequest, InvocationResult, Message as IpcMessage, PutRequest, GetRequest};

#[derive(Parser, Debug)]
#[command(author, version, about = "A demo function worker hosting the praas example functions", long_about = None)]
struct Args {
    /// Run as a worker subprocess, reading invocations from stdin. This is
    /// always set when `praas-demo-invoker` is spawned by
    /// `praas::worker_pool::FunctionWorker::spawn`; it exists as an
    /// explicit flag rather than an implicit default so a direct human
    /// invocation fails loudly instead of hanging on stdin.
    #[arg(long)]
    worker: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    if !args.worker {
        anyhow::bail!("praas-demo-invoker is only meant to be spawned with --worker");
    }

    let process_id = std::env::var("PRAAS_PROCESS_ID").unwrap_or_default();
    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut input = stdin.lock();
    let mut output = stdout.lock();

    run(&process_id, &mut input, &mut output)
}

fn run(process_id: &str, input: &mut dyn Read, output: &mut dyn Write) -> anyhow::Result<()> {
    loop {
        let Some((header, payload)) = receive_blocking(input)? else {
            break;
        };

        match ipc_proto::Message::parse(header)? {
            IpcMessage::InvocationRequest(req) => {
                let invocation_id = req.invocation_id();
                let function_name = req.function_name();
                let lengths = req.buffer_lengths();
                let buffers = split_payload(payload.as_slice(), &lengths);

                let (return_code, result) = match dispatch(&function_name, &buffers, process_id, input, output) {
                    Ok(outcome) => outcome,
                    Err(e) => (-1, e.to_string().into_bytes()),
                };

                let reply = InvocationResult::new(&invocation_id, result.len() as i32, return_code)?;
                send_blocking(output, reply.frame(), &result)?;
                output.flush()?;
            }
            IpcMessage::ApplicationUpdate(_) => {
                // Membership changes don't affect any of the demo functions;
                // nothing to update.
            }
            other => {
                tracing::warn!(?other, "worker received an unexpected message type");
            }
        }
    }
    Ok(())
}

fn split_payload(payload: &[u8], lengths: &[i32]) -> Vec<Vec<u8>> {
    let mut out = Vec::with_capacity(lengths.len());
    let mut offset = 0usize;
    for &len in lengths {
        let len = len.max(0) as usize;
        let end = (offset + len).min(payload.len());
        out.push(payload[offset..end].to_vec());
        offset = end;
    }
    out
}

fn dispatch(
    function_name: &str,
    buffers: &[Vec<u8>],
    process_id: &str,
    input: &mut dyn Read,
    output: &mut dyn Write,
) -> anyhow::Result<(i32, Vec<u8>)> {
    match function_name {
        "hello-world" => Ok((0, b"Hello, world!".to_vec())),
        "add" => Ok(add(buffers)),
        "power" => power(buffers, input, output),
        "send_message" => send_message(buffers, process_id, output),
        "get_message_self" => get_message_self(buffers, process_id, input, output),
        "remote_invocation" => remote_invocation(buffers, input, output),
        other => Ok((-1, format!("unknown function: {other}").into_bytes())),
    }
}

fn read_i32(buf: &[u8]) -> anyhow::Result<i32> {
    let bytes: [u8; 4] = buf.get(0..4).ok_or_else(|| anyhow::anyhow!("buffer too short for an i32"))?.try_into()?;
    Ok(i32::from_le_bytes(bytes))
}

fn add(buffers: &[Vec<u8>]) -> (i32, Vec<u8>) {
    if buffers.len() != 2 {
        return (-1, b"add expects exactly two buffers".to_vec());
    }
    match (read_i32(&buffers[0]), read_i32(&buffers[1])) {
        (Ok(a), Ok(b)) => (0, (a + b).to_le_bytes().to_vec()),
        _ => (-1, b"add expects two 4-byte integers".to_vec()),
    }
}

/// Computes `base ^ exponent` by recursively invoking itself through the
/// controller's local nested-invocation path (`process_id == "SELF"`),
/// exercising the same wire shape a real recursive function would use.
fn power(buffers: &[Vec<u8>], input: &mut dyn Read, output: &mut dyn Write) -> anyhow::Result<(i32, Vec<u8>)> {
    if buffers.len() != 2 {
        return Ok((-1, b"power expects exactly two buffers".to_vec()));
    }
    let base = read_i32(&buffers[0])?;
    let exponent = read_i32(&buffers[1])?;

    if exponent <= 0 {
        return Ok((0, 1i32.to_le_bytes().to_vec()));
    }

    let (return_code, result) = nested_invoke(
        input,
        output,
        "power",
        "SELF",
        &[base.to_le_bytes().to_vec(), (exponent - 1).to_le_bytes().to_vec()],
    )?;
    if return_code != 0 {
        return Ok((return_code, result));
    }
    let sub_result = read_i32(&result)?;
    Ok((0, (base * sub_result).to_le_bytes().to_vec()))
}

fn send_message(buffers: &[Vec<u8>], process_id: &str, output: &mut dyn Write) -> anyhow::Result<(i32, Vec<u8>)> {
    if buffers.len() != 2 {
        return Ok((-1, b"send_message expects a name buffer and a payload buffer".to_vec()));
    }
    let name = String::from_utf8_lossy(&buffers[0]).into_owned();
    let request = PutRequest::new(process_id, &name, buffers[1].len() as i32, false)?;
    send_blocking(output, request.frame(), &buffers[1])?;
    output.flush()?;
    Ok((0, Vec::new()))
}

fn get_message_self(
    buffers: &[Vec<u8>],
    process_id: &str,
    input: &mut dyn Read,
    output: &mut dyn Write,
) -> anyhow::Result<(i32, Vec<u8>)> {
    if buffers.len() != 1 {
        return Ok((-1, b"get_message_self expects exactly one name buffer".to_vec()));
    }
    let name = String::from_utf8_lossy(&buffers[0]).into_owned();

    let request = GetRequest::new(process_id, &name, false)?;
    send_blocking(output, request.frame(), &[])?;
    output.flush()?;

    let Some((header, payload)) = receive_blocking(input)? else {
        anyhow::bail!("controller closed the pipe while waiting for a GET_REQUEST reply");
    };
    match ipc_proto::Message::parse(header)? {
        IpcMessage::PutRequest(reply) if reply.data_len() < 0 => Ok((-1, Vec::new())),
        IpcMessage::PutRequest(_) => Ok((0, payload.into_vec())),
        _ => anyhow::bail!("expected a PUT_REQUEST reply to GET_REQUEST"),
    }
}

/// Invokes `add` on the named peer process and doubles its result
/// (spec.md §8 scenario 6).
fn remote_invocation(buffers: &[Vec<u8>], input: &mut dyn Read, output: &mut dyn Write) -> anyhow::Result<(i32, Vec<u8>)> {
    if buffers.len() != 3 {
        return Ok((-1, b"remote_invocation expects a peer name and two integer buffers".to_vec()));
    }
    let peer = String::from_utf8_lossy(&buffers[0]).into_owned();
    let (return_code, result) = nested_invoke(input, output, "add", &peer, &[buffers[1].clone(), buffers[2].clone()])?;
    if return_code != 0 {
        return Ok((return_code, result));
    }
    let sum = read_i32(&result)?;
    Ok((0, (sum * 2).to_le_bytes().to_vec()))
}

/// Sends an `INVOCATION_REQUEST` to `target` ("SELF" for local recursion,
/// a process id for a remote peer) and blocks for the matching
/// `INVOCATION_RESULT`. Safe because exactly one invocation is ever in
/// flight on this pipe at a time (§5).
fn nested_invoke(
    input: &mut dyn Read,
    output: &mut dyn Write,
    function_name: &str,
    target: &str,
    buffers: &[Vec<u8>],
) -> anyhow::Result<(i32, Vec<u8>)> {
    let invocation_id = Uuid::new_v4().to_string();
    let mut request = InvocationRequest::new(&invocation_id, function_name, target)?;
    let lengths: Vec<i32> = buffers.iter().map(|b| b.len() as i32).collect();
    request.set_buffer_lengths(&lengths)?;

    let mut payload = Vec::new();
    for buf in buffers {
        payload.extend_from_slice(buf);
    }

    let mut frame = request.into_frame();
    frame.set_total_length(payload.len() as u32);
    send_blocking(output, &frame, &payload)?;
    output.flush()?;

    let Some((header, reply_payload)) = receive_blocking(input)? else {
        anyhow::bail!("controller closed the pipe while waiting for a nested invocation result");
    };
    match ipc_proto::Message::parse(header)? {
        IpcMessage::InvocationResult(res) if res.invocation_id() == invocation_id => {
            Ok((res.return_code(), reply_payload.into_vec()))
        }
        IpcMessage::InvocationResult(_) => anyhow::bail!("received a result for a different invocation id"),
        _ => anyhow::bail!("expected an INVOCATION_RESULT reply"),
    }
}
