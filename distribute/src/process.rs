//! Ranks as separate processes: the coordinator spawns `ccprop worker` children
//! and talks to each over its stdin and stdout.
//!
//! Every message on a pipe is a little endian `u64` byte length followed by the bytes.

use std::{
    io::{BufReader, ErrorKind, Read, Write},
    path::{Path, PathBuf},
    process::{Child, ChildStdin, ChildStdout, Command, Stdio},
    sync::Mutex,
};

use crate::{comm::Communicator, context::WorkerContext, error::DistributeError};

/// Subcommand a worker process is started with.
pub const WORKER_COMMAND: &str = "worker";

const MAX_MESSAGE_BYTES: u64 = 1 << 30;

fn pipe_error(rank: usize, peer: usize, error: std::io::Error) -> DistributeError {
    match error.kind() {
        ErrorKind::UnexpectedEof | ErrorKind::BrokenPipe => DistributeError::Disconnected { rank, peer },
        _ => DistributeError::Pipe {
            rank,
            peer,
            source: error,
        },
    }
}

/// Length prefixed messages over one reader and one writer.
struct Link<R, W> {
    reader: Mutex<R>,
    writer: Mutex<W>,
}

impl<R: Read, W: Write> Link<R, W> {
    fn new(reader: R, writer: W) -> Self {
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
        }
    }

    fn send(&self, rank: usize, peer: usize, message: &[u8]) -> Result<(), DistributeError> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| DistributeError::protocol(rank, format!("pipe to rank {peer} is poisoned")))?;

        let mut write = || -> std::io::Result<()> {
            writer.write_all(&(message.len() as u64).to_le_bytes())?;
            writer.write_all(message)?;
            writer.flush()
        };

        write().map_err(|e| pipe_error(rank, peer, e))
    }

    fn recv(&self, rank: usize, peer: usize) -> Result<Vec<u8>, DistributeError> {
        let mut reader = self
            .reader
            .lock()
            .map_err(|_| DistributeError::protocol(rank, format!("pipe from rank {peer} is poisoned")))?;

        let mut length = [0; 8];
        reader
            .read_exact(&mut length)
            .map_err(|e| pipe_error(rank, peer, e))?;

        let length = u64::from_le_bytes(length);
        if length > MAX_MESSAGE_BYTES {
            return Err(DistributeError::frame(format!(
                "message of {length} bytes from rank {peer} exceeds {MAX_MESSAGE_BYTES}"
            )));
        }

        let mut message = vec![0; length as usize];
        reader
            .read_exact(&mut message)
            .map_err(|e| pipe_error(rank, peer, e))?;

        Ok(message)
    }
}

/// Worker side of a process world. Its only peer is the coordinator.
pub struct PipeEndpoint<R, W> {
    context: WorkerContext,
    link: Link<R, W>,
}

impl<R: Read, W: Write> PipeEndpoint<R, W> {
    pub fn new(context: WorkerContext, input: R, output: W) -> Self {
        Self {
            context,
            link: Link::new(input, output),
        }
    }

    fn check_peer(&self, peer: usize) -> Result<(), DistributeError> {
        if peer != WorkerContext::COORDINATOR || self.context.is_coordinator() {
            return Err(DistributeError::protocol(
                self.context.rank,
                format!("no pipe to rank {peer}"),
            ));
        }

        Ok(())
    }
}

impl<R: Read, W: Write> Communicator for PipeEndpoint<R, W> {
    fn context(&self) -> WorkerContext {
        self.context
    }

    fn send(&self, to: usize, frame: Vec<u8>) -> Result<(), DistributeError> {
        self.check_peer(to)?;
        self.link.send(self.context.rank, to, &frame)
    }

    fn recv(&self, from: usize) -> Result<Vec<u8>, DistributeError> {
        self.check_peer(from)?;
        self.link.recv(self.context.rank, from)
    }
}

struct WorkerProcess {
    rank: usize,
    child: Child,
    link: Link<BufReader<ChildStdout>, ChildStdin>,
}

/// Coordinator side of a process world, owning one child process per other rank.
pub struct ProcessWorld {
    context: WorkerContext,
    workers: Vec<WorkerProcess>,
}

impl ProcessWorld {
    /// Starts ranks `1..world_size` as `program worker --rank r --world-size n`
    /// and sends each of them `handshake` as its first message.
    pub fn spawn(program: &Path, world_size: usize, handshake: &[u8]) -> Result<Self, DistributeError> {
        let context = WorkerContext::new(WorkerContext::COORDINATOR, world_size)?;
        let mut world = Self {
            context,
            workers: Vec::with_capacity(world_size - 1),
        };

        for peer in WorkerContext::world(world_size).skip(1) {
            let worker = spawn_worker(program, peer)?;
            tracing::debug!(rank = peer.rank, pid = worker.child.id(), "worker process started");
            world.workers.push(worker);
        }

        for worker in &world.workers {
            worker.link.send(context.rank, worker.rank, handshake)?;
        }

        Ok(world)
    }

    fn worker(&self, peer: usize) -> Result<&WorkerProcess, DistributeError> {
        peer.checked_sub(1)
            .and_then(|i| self.workers.get(i))
            .ok_or_else(|| DistributeError::protocol(self.context.rank, format!("no worker process of rank {peer}")))
    }

    /// Closes every pipe and waits for the children.
    ///
    /// With `stop` set, children still running are killed and reported as stopped.
    pub fn finish(self, stop: bool) -> Vec<(usize, Result<(), DistributeError>)> {
        let mut children = Vec::with_capacity(self.workers.len());
        for WorkerProcess { rank, child, link } in self.workers {
            drop(link);
            children.push((rank, child));
        }

        children
            .into_iter()
            .map(|(rank, mut child)| (rank, wait_worker(rank, &mut child, stop)))
            .collect()
    }
}

fn spawn_worker(program: &Path, peer: WorkerContext) -> Result<WorkerProcess, DistributeError> {
    let spawn_error = |source| DistributeError::Spawn {
        program: program.to_path_buf(),
        source,
    };

    let mut child = Command::new(program)
        .arg(WORKER_COMMAND)
        .arg("--rank")
        .arg(peer.rank.to_string())
        .arg("--world-size")
        .arg(peer.world_size.to_string())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(spawn_error)?;

    let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
        // unreachable with piped stdio, the child still has to be reaped
        let _ = child.kill();
        let _ = child.wait();
        return Err(spawn_error(std::io::Error::other("worker pipes are missing")));
    };

    Ok(WorkerProcess {
        rank: peer.rank,
        child,
        link: Link::new(BufReader::new(stdout), stdin),
    })
}

fn wait_worker(rank: usize, child: &mut Child, stop: bool) -> Result<(), DistributeError> {
    let wait_error = |source| DistributeError::Pipe {
        rank: WorkerContext::COORDINATOR,
        peer: rank,
        source,
    };

    if stop && child.try_wait().map_err(wait_error)?.is_none() {
        child.kill().map_err(wait_error)?;
        child.wait().map_err(wait_error)?;
        return Err(DistributeError::WorkerStopped { rank });
    }

    let status = child.wait().map_err(wait_error)?;
    if status.success() {
        Ok(())
    } else {
        Err(DistributeError::WorkerExit {
            rank,
            code: status.code(),
        })
    }
}

impl Communicator for ProcessWorld {
    fn context(&self) -> WorkerContext {
        self.context
    }

    fn send(&self, to: usize, frame: Vec<u8>) -> Result<(), DistributeError> {
        self.worker(to)?.link.send(self.context.rank, to, &frame)
    }

    fn recv(&self, from: usize) -> Result<Vec<u8>, DistributeError> {
        self.worker(from)?.link.recv(self.context.rank, from)
    }
}

/// Program to start worker processes from, this executable by default.
pub fn current_program() -> Result<PathBuf, DistributeError> {
    std::env::current_exe().map_err(|source| DistributeError::Spawn {
        program: PathBuf::from(WORKER_COMMAND),
        source,
    })
}

#[cfg(test)]
mod test {
    use std::{io::Cursor, path::Path};

    use crate::{comm::Communicator, context::WorkerContext, error::DistributeError, wire};

    use super::{PipeEndpoint, ProcessWorld};

    fn message(bytes: &[u8]) -> Vec<u8> {
        let mut stream = (bytes.len() as u64).to_le_bytes().to_vec();
        stream.extend_from_slice(bytes);
        stream
    }

    #[test]
    fn test_pipe_endpoint() {
        let context = WorkerContext::new(2, 3).unwrap();
        let mut input = message(b"config");
        input.extend(message(&wire::encode_u64s(&[wire::REQUEST])));

        let mut output = Vec::new();
        let endpoint = PipeEndpoint::new(context, Cursor::new(input), &mut output);
        assert_eq!(endpoint.recv(0).unwrap(), b"config");
        assert_eq!(wire::decode_u64s(&endpoint.recv(0).unwrap()).unwrap(), [wire::REQUEST]);
        assert!(matches!(
            endpoint.recv(0),
            Err(DistributeError::Disconnected { rank: 2, peer: 0 })
        ));

        endpoint.send(0, vec![7, 8]).unwrap();
        assert!(matches!(endpoint.send(1, vec![0]), Err(DistributeError::Protocol { .. })));
        drop(endpoint);

        assert_eq!(output, message(&[7, 8]));
    }

    #[test]
    fn test_broken_messages() {
        let context = WorkerContext::new(1, 2).unwrap();

        let mut truncated = message(&[1, 2, 3, 4]);
        truncated.pop();
        let endpoint = PipeEndpoint::new(context, Cursor::new(truncated), Vec::new());
        assert!(endpoint.recv(0).unwrap_err().is_secondary());

        let oversized = u64::MAX.to_le_bytes().to_vec();
        let endpoint = PipeEndpoint::new(context, Cursor::new(oversized), Vec::new());
        assert!(matches!(endpoint.recv(0), Err(DistributeError::Frame { .. })));
    }

    #[test]
    fn test_missing_program() {
        let program = Path::new("/nonexistent/ccprop-worker");
        assert!(matches!(
            ProcessWorld::spawn(program, 2, b"{}"),
            Err(DistributeError::Spawn { .. })
        ));

        let single = ProcessWorld::spawn(program, 1, b"{}").unwrap();
        assert_eq!(single.world_size(), 1);
        assert!(single.finish(false).is_empty());

        assert!(matches!(
            ProcessWorld::spawn(program, 0, b"{}"),
            Err(DistributeError::InvalidWorld { .. })
        ));
    }
}
