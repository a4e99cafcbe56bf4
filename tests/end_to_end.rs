use hashgate::config::{IssuerConfigBuilder, SolverConfigBuilder};
use hashgate::session::{run_solver, SolverContext};
use hashgate::{
    Hashcash, IssuerConfig, KeyMaterial, PuzzleError, QuoteBook, RunReport, Server, SessionError,
    SolverClient, SolverConfig,
};
use rsa::pkcs1::{EncodeRsaPrivateKey, LineEnding};
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

fn keys() -> Arc<KeyMaterial> {
    static KEYS: OnceLock<Arc<KeyMaterial>> = OnceLock::new();
    KEYS.get_or_init(|| Arc::new(KeyMaterial::generate(1024).unwrap()))
        .clone()
}

fn issuer_config(difficulty: u32, max_sessions: usize, io_timeout: Duration) -> IssuerConfig {
    IssuerConfigBuilder::default()
        .listen_addr("127.0.0.1:0")
        .difficulty(difficulty)
        .stamp_timeout(Duration::from_secs(500))
        .io_timeout(io_timeout)
        .max_sessions(max_sessions)
        .build_validated()
        .unwrap()
}

fn solver_config(addrs: Vec<String>, max_iterations: u64) -> SolverConfigBuilder {
    SolverConfigBuilder::default()
        .server_addrs(addrs)
        .max_iterations(max_iterations)
        .io_timeout(Duration::from_secs(10))
}

async fn start(config: &IssuerConfig) -> (SocketAddr, CancellationToken, JoinHandle<()>) {
    let server = Server::bind(
        config,
        keys(),
        Arc::new(QuoteBook::builtin()),
        Hashcash::default(),
    )
    .await
    .unwrap();
    let addr = server.local_addr().unwrap();
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(server.run(cancel.clone()));
    (addr, cancel, handle)
}

async fn stop(cancel: CancellationToken, handle: JoinHandle<()>) {
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .unwrap()
        .unwrap();
}

async fn fetch(ctx: &SolverContext, stream: TcpStream) -> Result<Vec<u8>, SessionError> {
    run_solver(ctx, stream, &CancellationToken::new()).await
}

#[tokio::test]
async fn solver_receives_quote_over_tcp() {
    let (addr, cancel, handle) = start(&issuer_config(5, 16, Duration::from_secs(10))).await;

    let config: SolverConfig = solver_config(vec![addr.to_string()], 10_000_000)
        .build_validated()
        .unwrap();
    let ctx = SolverContext::new(&config, keys(), Hashcash::default());
    let stream = TcpStream::connect(addr).await.unwrap();
    let body = fetch(&ctx, stream).await.unwrap();
    let quote = String::from_utf8(body).unwrap();
    assert!(QuoteBook::builtin().contains_text(&quote));

    stop(cancel, handle).await;
}

#[tokio::test]
async fn worker_pool_completes_every_request() {
    let (addr, cancel, handle) = start(&issuer_config(6, 16, Duration::from_secs(10))).await;

    let config = solver_config(vec![addr.to_string(), addr.to_string()], 10_000_000)
        .workers(3)
        .requests_per_worker(2)
        .solve_threads(2)
        .request_delay(Duration::from_millis(10))
        .worker_spawn_delay(Duration::from_millis(5))
        .build_validated()
        .unwrap();
    let client = SolverClient::new(config, keys(), Hashcash::default()).unwrap();
    let report = client.run(&CancellationToken::new()).await;
    assert_eq!(
        report,
        RunReport {
            succeeded: 6,
            failed: 0,
            cancelled: 0
        }
    );

    stop(cancel, handle).await;
}

#[tokio::test]
async fn exhausted_budget_counts_as_failure() {
    let (addr, cancel, handle) =
        start(&issuer_config(hashgate::MAX_DIFFICULTY, 4, Duration::from_secs(10))).await;

    let config = solver_config(vec![addr.to_string()], 1)
        .build_validated()
        .unwrap();
    let ctx = SolverContext::new(&config, keys(), Hashcash::default());
    let stream = TcpStream::connect(addr).await.unwrap();
    assert!(matches!(
        fetch(&ctx, stream).await,
        Err(SessionError::Puzzle(PuzzleError::PuzzleExhausted { iterations: 1 }))
    ));

    let client = SolverClient::new(config, keys(), Hashcash::default()).unwrap();
    let report = client.run(&CancellationToken::new()).await;
    assert_eq!(report.failed, 1);

    stop(cancel, handle).await;
}

#[tokio::test]
async fn cancelled_client_abandons_search() {
    let (addr, cancel, handle) =
        start(&issuer_config(hashgate::MAX_DIFFICULTY, 4, Duration::from_secs(10))).await;

    let config = solver_config(vec![addr.to_string()], u64::MAX)
        .solve_threads(2)
        .requests_per_worker(3)
        .build_validated()
        .unwrap();
    let client = SolverClient::new(config, keys(), Hashcash::default()).unwrap();
    let client_cancel = CancellationToken::new();
    let trigger = client_cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let report = tokio::time::timeout(Duration::from_secs(10), client.run(&client_cancel))
        .await
        .unwrap();
    assert_eq!(
        report,
        RunReport {
            succeeded: 0,
            failed: 0,
            cancelled: 1
        }
    );

    stop(cancel, handle).await;
}

#[tokio::test]
async fn foreign_key_gets_nothing() {
    let (addr, cancel, handle) = start(&issuer_config(4, 4, Duration::from_secs(10))).await;

    let stranger = Arc::new(KeyMaterial::generate(1024).unwrap());
    let config = solver_config(vec![addr.to_string()], 10_000_000)
        .build_validated()
        .unwrap();
    let ctx = SolverContext::new(&config, stranger, Hashcash::default());
    let stream = TcpStream::connect(addr).await.unwrap();
    assert!(fetch(&ctx, stream).await.is_err());

    stop(cancel, handle).await;
}

#[tokio::test]
async fn excess_connection_waits_for_permit() {
    let (addr, cancel, handle) = start(&issuer_config(4, 1, Duration::from_millis(500))).await;

    // Holds the only permit until the server's read timeout fires.
    let idle = TcpStream::connect(addr).await.unwrap();

    let config = solver_config(vec![addr.to_string()], 10_000_000)
        .build_validated()
        .unwrap();
    let ctx = SolverContext::new(&config, keys(), Hashcash::default());
    let stream = TcpStream::connect(addr).await.unwrap();
    let body = fetch(&ctx, stream).await.unwrap();
    assert!(!body.is_empty());
    drop(idle);

    stop(cancel, handle).await;
}

#[tokio::test]
async fn server_loads_keys_and_quotes_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let key_path = dir.path().join("key.pem");
    let pem = keys().private_key().to_pkcs1_pem(LineEnding::LF).unwrap();
    std::fs::write(&key_path, pem.as_bytes()).unwrap();
    let quotes_path = dir.path().join("quotes.json");
    std::fs::write(
        &quotes_path,
        r#"[{"quote": "Only this one", "author": "Test"}]"#,
    )
    .unwrap();

    let config = IssuerConfigBuilder::default()
        .listen_addr("127.0.0.1:0")
        .difficulty(4)
        .stamp_timeout(Duration::from_secs(500))
        .private_key_path(key_path)
        .quotes_path(quotes_path)
        .build_validated()
        .unwrap();
    let server = Server::from_config(&config).await.unwrap();
    let addr = server.local_addr().unwrap();
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(server.run(cancel.clone()));

    let solver = solver_config(vec![addr.to_string()], 10_000_000)
        .build_validated()
        .unwrap();
    let ctx = SolverContext::new(&solver, keys(), Hashcash::default());
    let stream = TcpStream::connect(addr).await.unwrap();
    assert_eq!(fetch(&ctx, stream).await.unwrap(), b"Only this one");

    stop(cancel, handle).await;
}

#[tokio::test]
async fn missing_key_file_fails_startup() {
    let config = IssuerConfigBuilder::default()
        .listen_addr("127.0.0.1:0")
        .difficulty(4)
        .stamp_timeout(Duration::from_secs(500))
        .private_key_path("/nonexistent/key.pem")
        .build_validated()
        .unwrap();
    assert!(matches!(
        Server::from_config(&config).await,
        Err(hashgate::Error::Config(hashgate::ConfigError::Key(_)))
    ));
}
