use anyhow::Result;
use fex::server::{self, ServerConfig};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

struct TestServer {
    port: u16,
    root: PathBuf,
    _tmp: tempfile::TempDir,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(port: u16) -> Result<Self> {
        let stream = TcpStream::connect(("127.0.0.1", port)).await?;
        let (r, w) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(r),
            writer: w,
        })
    }

    async fn send(&mut self, line: &str) -> Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<String> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        anyhow::ensure!(n > 0, "server closed the stream");
        Ok(line.trim_end_matches('\n').to_string())
    }
}

async fn start_server() -> Result<TestServer> {
    let tmp = tempfile::tempdir()?;
    let root = tmp.path().to_path_buf();

    // Pick a free port and start a real server
    let port = {
        let sock = std::net::TcpListener::bind("127.0.0.1:0")?;
        let p = sock.local_addr()?.port();
        drop(sock);
        p
    };
    let bind = format!("127.0.0.1:{}", port);
    let serve_root = root.clone();
    let task = tokio::spawn(async move {
        let _ = server::serve(&bind, &serve_root, ServerConfig::default()).await;
    });

    // Wait for the server to start accepting connections
    for _ in 0..50u32 {
        if TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    Ok(TestServer {
        port,
        root,
        _tmp: tmp,
        task,
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn register_welcome_conflict_and_release() -> Result<()> {
    let srv = start_server().await?;

    let mut alice = Client::connect(srv.port).await?;
    alice.send("/register alice").await?;
    assert_eq!(alice.recv().await?, "Welcome alice!");

    // Second connection cannot take the live handle
    let mut imposter = Client::connect(srv.port).await?;
    imposter.send("/register alice").await?;
    assert_eq!(
        imposter.recv().await?,
        "Error: Registration failed. Handle or alias already exists."
    );

    // Leaving frees the handle
    alice.send("/leave").await?;
    assert_eq!(alice.recv().await?, "Connection closed. Thank you!");

    // Cleanup is asynchronous; retry until the handle is free
    let mut registered = false;
    for _ in 0..50u32 {
        imposter.send("/register alice").await?;
        let resp = imposter.recv().await?;
        if resp == "Welcome alice!" {
            registered = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert!(registered, "handle was never released after /leave");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn store_then_get_round_trips() -> Result<()> {
    let srv = start_server().await?;
    let mut c = Client::connect(srv.port).await?;

    c.send("/register alice").await?;
    assert_eq!(c.recv().await?, "Welcome alice!");

    c.send("/store notes.txt").await?;
    c.send("hello").await?;
    c.send("world").await?;
    c.send("EOF").await?;
    let status = c.recv().await?;
    assert!(status.starts_with("alice<"), "status: {status}");
    assert!(status.ends_with(">: Uploaded notes.txt"), "status: {status}");
    let ts = &status["alice<".len()..status.find('>').unwrap()];
    assert_eq!(ts.len(), 19, "timestamp not yyyy-MM-dd HH:mm:ss: {ts}");

    // The file landed under the handle's container, byte for byte
    let stored = std::fs::read(srv.root.join("alice/notes.txt"))?;
    assert_eq!(stored, b"hello\nworld\n");

    c.send("/get notes.txt").await?;
    assert_eq!(c.recv().await?, "hello");
    assert_eq!(c.recv().await?, "world");
    assert_eq!(c.recv().await?, "EOF");
    assert_eq!(c.recv().await?, "Enter command:");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn get_missing_file_keeps_framing_consistent() -> Result<()> {
    let srv = start_server().await?;
    let mut c = Client::connect(srv.port).await?;

    c.send("/register alice").await?;
    assert_eq!(c.recv().await?, "Welcome alice!");

    c.send("/get never-stored.txt").await?;
    assert_eq!(c.recv().await?, "Error: File not found on the server.");
    assert_eq!(c.recv().await?, "EOF");
    assert_eq!(c.recv().await?, "Enter command:");

    // Session survives; the connection keeps serving commands
    c.send("/dir").await?;
    assert_eq!(c.recv().await?, "Server Directory is empty.");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn get_on_unreadable_file_keeps_the_connection_alive() -> Result<()> {
    let srv = start_server().await?;
    let mut c = Client::connect(srv.port).await?;

    c.send("/register alice").await?;
    assert_eq!(c.recv().await?, "Welcome alice!");

    // A directory where a stored file should be: open succeeds, reading fails
    std::fs::create_dir_all(srv.root.join("alice/broken.txt"))?;

    c.send("/get broken.txt").await?;
    assert_eq!(c.recv().await?, "Error: Failed to read the file.");
    assert_eq!(c.recv().await?, "EOF");
    assert_eq!(c.recv().await?, "Enter command:");

    // The worker survived the read failure and keeps serving commands
    c.send("/dir").await?;
    assert_eq!(c.recv().await?, "Server Directory is empty.");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn transfer_commands_require_registration() -> Result<()> {
    let srv = start_server().await?;
    let mut c = Client::connect(srv.port).await?;

    // /store before /register: the frame is drained and discarded
    c.send("/store f.txt").await?;
    c.send("secret content").await?;
    c.send("EOF").await?;
    assert_eq!(c.recv().await?, "Error: Register a handle before using /store.");

    // No filesystem side effect
    let entries: Vec<_> = std::fs::read_dir(&srv.root)?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    assert!(entries.is_empty(), "unexpected files: {entries:?}");

    // /get before /register still closes its frame
    c.send("/get f.txt").await?;
    assert_eq!(c.recv().await?, "Error: Register a handle before using /get.");
    assert_eq!(c.recv().await?, "EOF");
    assert_eq!(c.recv().await?, "Enter command:");

    // Command stream is still in sync
    c.send("/register late").await?;
    assert_eq!(c.recv().await?, "Welcome late!");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dir_listing_is_scoped_per_handle() -> Result<()> {
    let srv = start_server().await?;

    let mut bob = Client::connect(srv.port).await?;
    bob.send("/register bob").await?;
    assert_eq!(bob.recv().await?, "Welcome bob!");

    bob.send("/dir").await?;
    assert_eq!(bob.recv().await?, "Server Directory is empty.");

    bob.send("/store data.txt").await?;
    bob.send("payload").await?;
    bob.send("EOF").await?;
    let status = bob.recv().await?;
    assert!(status.contains(": Uploaded data.txt"), "status: {status}");

    bob.send("/dir").await?;
    assert_eq!(bob.recv().await?, "Server Directory: data.txt");

    // Another handle sees only its own (empty) directory
    let mut carol = Client::connect(srv.port).await?;
    carol.send("/register carol").await?;
    assert_eq!(carol.recv().await?, "Welcome carol!");
    carol.send("/dir").await?;
    assert_eq!(carol.recv().await?, "Server Directory is empty.");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn syntax_help_and_unknown_commands() -> Result<()> {
    let srv = start_server().await?;
    let mut c = Client::connect(srv.port).await?;

    c.send("/register").await?;
    assert_eq!(c.recv().await?, "Error: Invalid /register command syntax.");

    c.send("/register too many").await?;
    assert_eq!(c.recv().await?, "Error: Invalid /register command syntax.");

    // Keyword matching is case-insensitive
    c.send("/REGISTER dana").await?;
    assert_eq!(c.recv().await?, "Welcome dana!");

    c.send("/register again").await?;
    assert_eq!(c.recv().await?, "Error: Already registered as dana.");

    c.send("/?").await?;
    let help = c.recv().await?;
    assert!(help.starts_with("Available commands:"), "help: {help}");
    assert!(help.contains("/store <filename>"));

    c.send("/bogus").await?;
    assert_eq!(c.recv().await?, "Error: Command not found.");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropped_connection_releases_the_handle() -> Result<()> {
    let srv = start_server().await?;

    let mut dave = Client::connect(srv.port).await?;
    dave.send("/register dave").await?;
    assert_eq!(dave.recv().await?, "Welcome dave!");
    drop(dave);

    // Worker cleanup races with us; poll until the handle frees up
    let mut c = Client::connect(srv.port).await?;
    let mut registered = false;
    for _ in 0..50u32 {
        c.send("/register dave").await?;
        if c.recv().await? == "Welcome dave!" {
            registered = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert!(registered, "handle was never released after disconnect");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_registration_of_same_handle_elects_one_winner() -> Result<()> {
    let srv = start_server().await?;

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let port = srv.port;
        tasks.push(tokio::spawn(async move {
            let mut c = Client::connect(port).await?;
            c.send("/register eve").await?;
            c.recv().await
        }));
    }
    let mut wins = 0;
    let mut conflicts = 0;
    for t in tasks {
        match t.await?.as_deref() {
            Ok("Welcome eve!") => wins += 1,
            Ok("Error: Registration failed. Handle or alias already exists.") => conflicts += 1,
            other => panic!("unexpected response: {other:?}"),
        }
    }
    assert_eq!(wins, 1);
    assert_eq!(conflicts, 7);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn overwrite_store_replaces_previous_content() -> Result<()> {
    let srv = start_server().await?;
    let mut c = Client::connect(srv.port).await?;

    c.send("/register alice").await?;
    assert_eq!(c.recv().await?, "Welcome alice!");

    c.send("/store doc.txt").await?;
    c.send("version one").await?;
    c.send("EOF").await?;
    c.recv().await?;

    c.send("/store doc.txt").await?;
    c.send("version two").await?;
    c.send("EOF").await?;
    c.recv().await?;

    let stored = std::fs::read(srv.root.join("alice/doc.txt"))?;
    assert_eq!(stored, b"version two\n");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn upload_audit_log_records_completed_stores() -> Result<()> {
    let srv = start_server().await?;
    let mut c = Client::connect(srv.port).await?;

    c.send("/register alice").await?;
    c.recv().await?;
    c.send("/store notes.txt").await?;
    c.send("hello").await?;
    c.send("EOF").await?;
    c.recv().await?;

    let log = fex::translog::UploadLog::new(&srv.root);
    let entries = log.read_log()?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].handle, "alice");
    assert_eq!(entries[0].filename, "notes.txt");
    assert_eq!(entries[0].bytes, 6);
    Ok(())
}
