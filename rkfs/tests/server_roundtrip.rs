use common::{FsOp, HandleToken, RkfsError};
use rkfs::client::{RkfsClient, is_not_found};
use rkfs::config::Config;
use rkfs::server::{build_service, run_endpoint};
use rkfs::tls::make_server_endpoint;

async fn start_server(root: &std::path::Path) -> String {
    let mut cfg = Config::with_fs_uri(format!("file://{}", root.display()));
    cfg.max_read_bytes = 1000;
    let endpoint = make_server_endpoint("127.0.0.1:0".parse().unwrap()).unwrap();
    let addr = endpoint.local_addr().unwrap().to_string();
    let (service, _reaper) = build_service(&cfg).unwrap();
    tokio::spawn(run_endpoint(endpoint, service, cfg.max_request_bytes));
    addr
}

#[tokio::test]
async fn test_upload_download_over_quic() {
    let tmp = tempfile::tempdir().unwrap();
    let remote_root = tmp.path().join("remote");
    std::fs::create_dir(&remote_root).unwrap();
    let addr = start_server(&remote_root).await;
    let client = RkfsClient::connect(&addr, "alice").await.unwrap();

    let local_in = tmp.path().join("in.bin");
    let payload: Vec<u8> = (0..5_500u32).map(|i| (i * 7 % 256) as u8).collect();
    std::fs::write(&local_in, &payload).unwrap();

    assert_eq!(client.upload(&local_in, "/in.bin").await.unwrap(), 5_500);
    let local_out = tmp.path().join("out.bin");
    assert_eq!(client.download("/in.bin", &local_out).await.unwrap(), 5_500);
    assert_eq!(std::fs::read(&local_out).unwrap(), payload);

    // reads are capped by max_read_bytes
    let h = client.open("/in.bin").await.unwrap();
    assert_eq!(client.read(h).await.unwrap().len(), 1000);
    client.close(h).await.unwrap();

    let listing = client.list_status("/").await.unwrap();
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].name, "in.bin");
    assert_eq!(listing[0].length, 5_500);

    assert!(client.remove("/in.bin", false).await.unwrap());
    assert!(!client.remove("/in.bin", false).await.unwrap());
}

#[tokio::test]
async fn test_errors_reach_the_client_verbatim() {
    let tmp = tempfile::tempdir().unwrap();
    let addr = start_server(tmp.path()).await;
    let client = RkfsClient::connect(&addr, "alice").await.unwrap();

    let err = client.close(HandleToken::random()).await.unwrap_err();
    assert!(is_not_found(&err));

    let err = client.open("/missing").await.unwrap_err();
    assert!(is_not_found(&err));

    let resp = client
        .call(FsOp::Create {
            path: "/no/parent/f".into(),
        })
        .await
        .unwrap();
    assert!(matches!(resp, Err(RkfsError::Io(_))));

    let anonymous = RkfsClient::connect(&addr, "").await.unwrap();
    let resp = anonymous
        .call(FsOp::ListStatus { path: "/".into() })
        .await
        .unwrap();
    assert!(matches!(resp, Err(RkfsError::Connection(_))));
}
