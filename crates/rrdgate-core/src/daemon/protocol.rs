//! Line client for the rrdcached text protocol.
//!
//! One request is a single line `<COMMAND> <args...>`. The response starts
//! with a status line `<n> <message>`: a negative `n` is a daemon-reported
//! error, a non-negative `n` promises exactly `n` more lines of body.
//!
//! Body formats consumed here:
//! - `INFO`: `<key> <type> <value>` triples; `last_update` and
//!   `ds[<name>].index` are the keys that matter.
//! - `FETCH`: `Start:`/`End:`/`Step:`/`DSCount:`/`DSName:` headers followed
//!   by one `<timestamp>: <v1> <v2> ...` line per row, NaN spelled `nan`.

use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::TcpStream;
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::archive::{ArchiveInfo, ConsolidationFn, FetchResult};

/// Socket read/write deadline. A daemon that stalls longer than this
/// surfaces as a transient timeout and goes through the retry path.
pub const IO_TIMEOUT: Duration = Duration::from_secs(10);

/// Daemon address: `unix:<path>` or `<host>:<port>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonAddr {
    Unix(PathBuf),
    Tcp(String),
}

impl DaemonAddr {
    pub fn parse(s: &str) -> Self {
        match s.strip_prefix("unix:") {
            Some(path) => DaemonAddr::Unix(PathBuf::from(path)),
            None => DaemonAddr::Tcp(s.to_string()),
        }
    }
}

impl std::fmt::Display for DaemonAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DaemonAddr::Unix(path) => write!(f, "unix:{}", path.display()),
            DaemonAddr::Tcp(addr) => write!(f, "{}", addr),
        }
    }
}

/// Error type for daemon exchanges.
#[derive(Debug)]
pub enum DaemonError {
    /// Establishing the stream failed.
    Connect(String),
    /// The socket deadline expired mid-exchange.
    Timeout(String),
    /// The peer went away mid-exchange.
    Connection(String),
    /// Some other I/O failure.
    Io(String),
    /// The response does not follow the protocol.
    Protocol(String),
    /// The daemon answered with a negative status.
    Server { code: i32, message: String },
}

impl DaemonError {
    /// Transient errors are worth a reconnect and retry; the rest would just
    /// fail again on a fresh connection.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DaemonError::Connect(_) | DaemonError::Timeout(_) | DaemonError::Connection(_)
        )
    }
}

impl std::fmt::Display for DaemonError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DaemonError::Connect(msg) => write!(f, "connect failed: {}", msg),
            DaemonError::Timeout(msg) => write!(f, "timed out: {}", msg),
            DaemonError::Connection(msg) => write!(f, "connection failed: {}", msg),
            DaemonError::Io(msg) => write!(f, "i/o error: {}", msg),
            DaemonError::Protocol(msg) => write!(f, "protocol violation: {}", msg),
            DaemonError::Server { code, message } => {
                write!(f, "daemon error {}: {}", code, message)
            }
        }
    }
}

impl std::error::Error for DaemonError {}

fn classify_io(context: &str, err: io::Error) -> DaemonError {
    use io::ErrorKind::*;
    match err.kind() {
        TimedOut | WouldBlock => DaemonError::Timeout(format!("{}: {}", context, err)),
        ConnectionRefused | ConnectionReset | ConnectionAborted | BrokenPipe | NotConnected
        | UnexpectedEof => DaemonError::Connection(format!("{}: {}", context, err)),
        _ => DaemonError::Io(format!("{}: {}", context, err)),
    }
}

#[derive(Debug)]
enum Stream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.read(buf),
            #[cfg(unix)]
            Stream::Unix(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.write(buf),
            #[cfg(unix)]
            Stream::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Tcp(s) => s.flush(),
            #[cfg(unix)]
            Stream::Unix(s) => s.flush(),
        }
    }
}

/// One established daemon connection.
#[derive(Debug)]
pub struct DaemonClient {
    reader: BufReader<Stream>,
}

impl DaemonClient {
    pub fn connect(addr: &DaemonAddr) -> Result<Self, DaemonError> {
        let stream = match addr {
            DaemonAddr::Tcp(hostport) => {
                let s = TcpStream::connect(hostport.as_str())
                    .map_err(|e| DaemonError::Connect(format!("{}: {}", hostport, e)))?;
                s.set_read_timeout(Some(IO_TIMEOUT))
                    .and_then(|_| s.set_write_timeout(Some(IO_TIMEOUT)))
                    .map_err(|e| DaemonError::Connect(format!("arming timeouts: {}", e)))?;
                Stream::Tcp(s)
            }
            #[cfg(unix)]
            DaemonAddr::Unix(path) => {
                let s = UnixStream::connect(path)
                    .map_err(|e| DaemonError::Connect(format!("{}: {}", path.display(), e)))?;
                s.set_read_timeout(Some(IO_TIMEOUT))
                    .and_then(|_| s.set_write_timeout(Some(IO_TIMEOUT)))
                    .map_err(|e| DaemonError::Connect(format!("arming timeouts: {}", e)))?;
                Stream::Unix(s)
            }
            #[cfg(not(unix))]
            DaemonAddr::Unix(path) => {
                return Err(DaemonError::Connect(format!(
                    "unix sockets unsupported on this platform: {}",
                    path.display()
                )));
            }
        };
        Ok(DaemonClient {
            reader: BufReader::new(stream),
        })
    }

    fn read_line(&mut self) -> Result<String, DaemonError> {
        let mut line = String::new();
        let n = self
            .reader
            .read_line(&mut line)
            .map_err(|e| classify_io("read", e))?;
        if n == 0 {
            return Err(DaemonError::Connection("daemon closed the connection".into()));
        }
        Ok(line.trim_end().to_string())
    }

    /// Sends one command line and collects the response body.
    fn exec(&mut self, command: &str) -> Result<Vec<String>, DaemonError> {
        self.reader
            .get_mut()
            .write_all(format!("{}\n", command).as_bytes())
            .map_err(|e| classify_io("send", e))?;

        let status = self.read_line()?;
        let (code, message) = status.split_once(' ').unwrap_or((status.as_str(), ""));
        let code: i32 = code
            .parse()
            .map_err(|_| DaemonError::Protocol(format!("bad status line {:?}", status)))?;
        if code < 0 {
            return Err(DaemonError::Server {
                code,
                message: message.to_string(),
            });
        }

        let mut body = Vec::with_capacity(code as usize);
        for _ in 0..code {
            body.push(self.read_line()?);
        }
        Ok(body)
    }

    /// Asks the daemon to write out its buffered updates for a file.
    pub fn flush(&mut self, file: &Path) -> Result<(), DaemonError> {
        self.exec(&format!("FLUSH {}", file.display())).map(|_| ())
    }

    pub fn info(&mut self, file: &Path) -> Result<ArchiveInfo, DaemonError> {
        let body = self.exec(&format!("INFO {}", file.display()))?;
        parse_info(&body)
    }

    /// Consolidated samples for `[start, end]`. The protocol carries no step
    /// argument; the daemon picks the resolution.
    pub fn fetch(
        &mut self,
        file: &Path,
        cf: ConsolidationFn,
        start: i64,
        end: i64,
    ) -> Result<FetchResult, DaemonError> {
        let body = self.exec(&format!(
            "FETCH {} {} {} {}",
            file.display(),
            cf.name(),
            start,
            end
        ))?;
        parse_fetch(&body)
    }
}

fn parse_info(lines: &[String]) -> Result<ArchiveInfo, DaemonError> {
    let mut last_update = None;
    let mut datasources = HashMap::new();
    for line in lines {
        let mut parts = line.splitn(3, ' ');
        let (Some(key), Some(_type), Some(value)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(DaemonError::Protocol(format!(
                "malformed info line {:?}",
                line
            )));
        };
        if key == "last_update" {
            last_update = value.trim().parse::<i64>().ok();
        } else if let Some(name) = key.strip_prefix("ds[").and_then(|k| k.strip_suffix("].index"))
        {
            if let Ok(index) = value.trim().parse::<usize>() {
                datasources.insert(name.to_string(), index);
            }
        }
    }
    let last_update = last_update
        .ok_or_else(|| DaemonError::Protocol("info response missing last_update".into()))?;
    Ok(ArchiveInfo {
        datasources,
        last_update,
    })
}

fn parse_fetch(lines: &[String]) -> Result<FetchResult, DaemonError> {
    let mut step = None;
    let mut start_header = None;
    let mut names = Vec::new();
    let mut rows = Vec::new();
    let mut first_ts = None;

    for line in lines {
        let Some((head, tail)) = line.split_once(':') else {
            continue;
        };
        let (head, tail) = (head.trim(), tail.trim());
        if let Ok(ts) = head.parse::<i64>() {
            // Row line: "<timestamp>: <v1> <v2> ...".
            first_ts.get_or_insert(ts);
            let row = tail
                .split_whitespace()
                .map(|tok| {
                    tok.parse::<f64>()
                        .map_err(|_| DaemonError::Protocol(format!("bad sample {:?}", tok)))
                })
                .collect::<Result<Vec<f64>, _>>()?;
            rows.push(row);
        } else {
            match head {
                "Step" => step = tail.parse::<u64>().ok(),
                "Start" => start_header = tail.parse::<i64>().ok(),
                "DSName" => names = tail.split_whitespace().map(str::to_string).collect(),
                _ => {} // FlushVersion, End, DSCount
            }
        }
    }

    let step =
        step.ok_or_else(|| DaemonError::Protocol("fetch response missing Step header".into()))?;
    // With no rows, synthesize the timestamp the first row would have had.
    let start = first_ts.unwrap_or_else(|| start_header.unwrap_or(0) + step as i64);
    Ok(FetchResult {
        start,
        step,
        names,
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader as StdBufReader, Write as _};
    use std::net::TcpListener;
    use std::thread;

    /// One-connection server answering each received command with the next
    /// canned response (`None` closes the connection instead).
    fn one_shot_server(responses: Vec<Option<String>>) -> (DaemonAddr, thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = DaemonAddr::Tcp(listener.local_addr().unwrap().to_string());
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = StdBufReader::new(stream.try_clone().unwrap());
            let mut stream = stream;
            for response in responses {
                let mut line = String::new();
                if reader.read_line(&mut line).unwrap_or(0) == 0 {
                    return;
                }
                match response {
                    Some(r) => stream.write_all(r.as_bytes()).unwrap(),
                    None => return,
                }
            }
        });
        (addr, handle)
    }

    #[test]
    fn test_addr_parse() {
        assert_eq!(
            DaemonAddr::parse("unix:/run/rrdcached.sock"),
            DaemonAddr::Unix(PathBuf::from("/run/rrdcached.sock"))
        );
        assert_eq!(
            DaemonAddr::parse("localhost:42217"),
            DaemonAddr::Tcp("localhost:42217".to_string())
        );
    }

    #[test]
    fn test_flush_round_trip() {
        let (addr, handle) =
            one_shot_server(vec![Some("0 Successfully flushed.\n".to_string())]);
        let mut client = DaemonClient::connect(&addr).unwrap();
        client.flush(Path::new("/data/a.rrd")).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_server_error_surfaces_code_and_message() {
        let (addr, handle) = one_shot_server(vec![Some("-1 No such file: /x.rrd\n".to_string())]);
        let mut client = DaemonClient::connect(&addr).unwrap();
        let err = client.flush(Path::new("/x.rrd")).unwrap_err();
        match err {
            DaemonError::Server { code, message } => {
                assert_eq!(code, -1);
                assert_eq!(message, "No such file: /x.rrd");
            }
            other => panic!("expected server error, got {:?}", other),
        }
        assert!(!DaemonError::Server {
            code: -1,
            message: String::new()
        }
        .is_transient());
        handle.join().unwrap();
    }

    #[test]
    fn test_closed_connection_is_transient() {
        let (addr, handle) = one_shot_server(vec![None]);
        let mut client = DaemonClient::connect(&addr).unwrap();
        let err = client.flush(Path::new("/x.rrd")).unwrap_err();
        assert!(err.is_transient(), "got {:?}", err);
        handle.join().unwrap();
    }

    #[test]
    fn test_info_parses_ds_indexes_and_last_update() {
        let body = "6 Info for /data/cpu.rrd follows\n\
                    filename 2 /data/cpu.rrd\n\
                    step 1 10\n\
                    last_update 1 1700000000\n\
                    ds[used].index 1 0\n\
                    ds[used].type 2 GAUGE\n\
                    ds[idle].index 1 1\n";
        let (addr, handle) = one_shot_server(vec![Some(body.to_string())]);
        let mut client = DaemonClient::connect(&addr).unwrap();
        let info = client.info(Path::new("/data/cpu.rrd")).unwrap();
        assert_eq!(info.last_update, 1_700_000_000);
        assert_eq!(info.datasources["used"], 0);
        assert_eq!(info.datasources["idle"], 1);
        handle.join().unwrap();
    }

    #[test]
    fn test_fetch_parses_headers_rows_and_nan() {
        let body = "8 Success\n\
                    FlushVersion: 1\n\
                    Start: 990\n\
                    End: 1020\n\
                    Step: 10\n\
                    DSCount: 2\n\
                    DSName: used idle\n\
                    1000: 1.5000000000e+00 nan\n\
                    1010: 2.5000000000e+00 -nan\n";
        let (addr, handle) = one_shot_server(vec![Some(body.to_string())]);
        let mut client = DaemonClient::connect(&addr).unwrap();
        let res = client
            .fetch(Path::new("/data/cpu.rrd"), ConsolidationFn::Average, 990, 1020)
            .unwrap();
        assert_eq!(res.start, 1000);
        assert_eq!(res.step, 10);
        assert_eq!(res.names, vec!["used".to_string(), "idle".to_string()]);
        assert_eq!(res.rows.len(), 2);
        assert_eq!(res.rows[0][0], 1.5);
        assert!(res.rows[0][1].is_nan());
        assert!(res.rows[1][1].is_nan());
        handle.join().unwrap();
    }

    #[test]
    fn test_fetch_with_no_rows_synthesizes_start() {
        let body = "6 Success\n\
                    FlushVersion: 1\n\
                    Start: 990\n\
                    End: 990\n\
                    Step: 10\n\
                    DSCount: 1\n\
                    DSName: v\n";
        let (addr, handle) = one_shot_server(vec![Some(body.to_string())]);
        let mut client = DaemonClient::connect(&addr).unwrap();
        let res = client
            .fetch(Path::new("/data/v.rrd"), ConsolidationFn::Average, 990, 990)
            .unwrap();
        assert_eq!(res.start, 1000);
        assert!(res.rows.is_empty());
        handle.join().unwrap();
    }
}
