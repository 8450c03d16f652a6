// One-time service bootstrap shared by the socket-level integration tests.
use std::{
    // `Arc` lets the server thread and the test thread share the published address.
    sync::{Arc, OnceLock},
    // Readiness polling sleeps between connect attempts.
    time::Duration,
};

// WebSocket endpoint every test in this binary connects to.
static SOCKET_URL: OnceLock<String> = OnceLock::new();
// Guards the bootstrap so only the first caller starts a server.
static SERVER_READY: OnceLock<()> = OnceLock::new();

// Start the service if needed and return the shared `ws://` endpoint.
pub fn ensure_server() -> &'static str {
    // Concurrent tests block here until the first caller finishes booting.
    SERVER_READY.get_or_init(|| {
        // Slot the server thread writes its bound address into.
        let published_addr = Arc::new(OnceLock::<String>::new());
        let published_addr_thread = Arc::clone(&published_addr);
        // A plain OS thread outlives the per-test Tokio runtimes.
        std::thread::spawn(move || {
            let runtime = tokio::runtime::Runtime::new().expect("test runtime");
            runtime.block_on(async move {
                // Ephemeral port, so parallel test binaries never collide.
                let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                    .await
                    .expect("bind ephemeral test port");
                let addr = listener.local_addr().expect("get local addr");
                let _ = published_addr_thread.set(addr.to_string());
                // Serve until the test process exits.
                physics_worker::run(listener).await.expect("server failed");
            });
        });
        wait_for_addr_and_readiness(published_addr);
    });

    SOCKET_URL
        .get()
        .expect("socket url should be initialized")
        .as_str()
}

// Wait for the address to be published, then for the listener to accept TCP.
fn wait_for_addr_and_readiness(published_addr: Arc<OnceLock<String>>) {
    let addr = loop {
        if let Some(addr) = published_addr.get() {
            break addr.clone();
        }
        std::thread::sleep(Duration::from_millis(10));
    };

    let _ = SOCKET_URL.set(format!("ws://{}/ws", addr));

    // A successful connect means the accept loop is running.
    for _ in 0..100 {
        if std::net::TcpStream::connect(&addr).is_ok() {
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    panic!("server did not become ready in time");
}
