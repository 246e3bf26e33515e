//! Minimal scriptable upstream SMTP server for end-to-end tests.

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
};

/// An upstream that accepts submissions and records their bodies, or refuses
/// them at end-of-data when told to.
pub struct MockUpstream {
    addr: SocketAddr,
    messages: Arc<Mutex<Vec<String>>>,
    reject_data: Arc<AtomicBool>,
}

impl MockUpstream {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let messages = Arc::new(Mutex::new(Vec::new()));
        let reject_data = Arc::new(AtomicBool::new(false));

        let accept_messages = Arc::clone(&messages);
        let accept_reject = Arc::clone(&reject_data);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _peer)) = listener.accept().await else {
                    return;
                };
                let messages = Arc::clone(&accept_messages);
                let reject = Arc::clone(&accept_reject);
                tokio::spawn(async move {
                    let _ = handle(stream, messages, reject).await;
                });
            }
        });

        Self {
            addr,
            messages,
            reject_data,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn message_count(&self) -> usize {
        self.messages.lock().unwrap().len()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    pub fn set_reject_data(&self, reject: bool) {
        self.reject_data.store(reject, Ordering::SeqCst);
    }

    /// Poll until `expected` submissions have been recorded.
    pub async fn wait_for_count(&self, expected: usize, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.message_count() < expected {
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {expected} messages (got {})",
                self.message_count()
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

async fn handle(
    stream: TcpStream,
    messages: Arc<Mutex<Vec<String>>>,
    reject: Arc<AtomicBool>,
) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    write_half.write_all(b"220 mock.test ESMTP\r\n").await?;

    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let command = line.trim_end();

        if starts_with_ignore_case(command, "EHLO") || starts_with_ignore_case(command, "LHLO") {
            write_half
                .write_all(b"250-mock.test\r\n250-PIPELINING\r\n250 8BITMIME\r\n")
                .await?;
        } else if starts_with_ignore_case(command, "HELO")
            || starts_with_ignore_case(command, "MAIL")
            || starts_with_ignore_case(command, "RCPT")
            || starts_with_ignore_case(command, "RSET")
            || starts_with_ignore_case(command, "NOOP")
        {
            write_half.write_all(b"250 OK\r\n").await?;
        } else if starts_with_ignore_case(command, "DATA") {
            write_half
                .write_all(b"354 End data with <CR><LF>.<CR><LF>\r\n")
                .await?;

            let mut body = String::new();
            loop {
                line.clear();
                if reader.read_line(&mut line).await? == 0 {
                    return Ok(());
                }
                let data_line = line.trim_end_matches(['\r', '\n']);
                if data_line == "." {
                    break;
                }
                body.push_str(data_line.strip_prefix('.').unwrap_or(data_line));
                body.push_str("\r\n");
            }

            if reject.load(Ordering::SeqCst) {
                write_half.write_all(b"550 5.7.1 rejected\r\n").await?;
            } else {
                messages.lock().unwrap().push(body);
                write_half.write_all(b"250 2.0.0 Ok: queued\r\n").await?;
            }
        } else if starts_with_ignore_case(command, "QUIT") {
            write_half.write_all(b"221 bye\r\n").await?;
            return Ok(());
        } else {
            write_half.write_all(b"500 unrecognized\r\n").await?;
        }
    }
}

fn starts_with_ignore_case(line: &str, prefix: &str) -> bool {
    line.len() >= prefix.len() && line[..prefix.len()].eq_ignore_ascii_case(prefix)
}
