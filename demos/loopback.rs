//! In-process loopback demo
//!
//! Run with: cargo run --example loopback
//!
//! Plays the remote peer with a `MemoryTransport`: opens a few widget
//! models, updates them, prints the resulting snapshots, then accepts a
//! peer-opened comm and echoes everything sent on it.
//!
//! Set `RUST_LOG=commsync=trace` to see every channel and model event.

use std::sync::Arc;

use futures::StreamExt;
use serde_json::json;
use tokio::sync::mpsc;

use commsync::{
    ContextConfig, MemoryTransport, Message, RenderContext, SequentialIds, StoreConfig,
};

const WIDGET_TARGET: &str = "jupyter.widget";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("commsync=debug".parse()?)
                .add_directive("loopback=debug".parse()?),
        )
        .init();

    let transport = MemoryTransport::new();
    let config = ContextConfig::default()
        .store(StoreConfig::default().reference_fields(["children", "layout"]))
        .widget_target(WIDGET_TARGET);
    let context = RenderContext::connected(Arc::new(transport.clone()), config)
        .with_id_generator(Arc::new(SequentialIds::new("local-")));

    // The peer announces a box holding a slider, both sharing one layout
    transport.deliver_open(
        WIDGET_TARGET,
        "layout",
        Message::new(json!({"state": {"_model_name": "LayoutModel", "width": "50%"}})),
    );
    transport.deliver_open(
        WIDGET_TARGET,
        "slider",
        Message::new(json!({"state": {
            "_model_module": "@jupyter-widgets/controls",
            "_model_name": "IntSliderModel",
            "_model_module_version": "2.0.0",
            "value": 0,
            "layout": "IPY_MODEL_layout",
        }})),
    );
    transport.deliver_open(
        WIDGET_TARGET,
        "box",
        Message::new(json!({"state": {
            "_model_name": "VBoxModel",
            "children": ["IPY_MODEL_slider"],
            "layout": "IPY_MODEL_layout",
        }})),
    );
    transport.deliver_message(
        "slider",
        Message::new(json!({"method": "update", "state": {"value": 42}})),
    );

    println!("=== Snapshot of 'box' ===");
    for (id, state) in context.model_state("box") {
        println!(
            "{:<8} {:<16} {}",
            id,
            state.name,
            serde_json::Value::Object(state.state)
        );
    }
    println!();

    let Some(comms) = context.comms() else {
        return Ok(());
    };

    // Accept comms the peer opens under "echo" and answer every message
    let (accepted_tx, mut accepted_rx) = mpsc::unbounded_channel();
    comms.register_target("echo", move |comm, _open| {
        let _ = accepted_tx.send(comm);
    });

    transport.deliver_open("echo", "peer-1", Message::new(json!({})));
    transport.deliver_message("peer-1", Message::new(json!("sent before anyone listened")));

    let comm = accepted_rx.recv().await.ok_or("echo comm was not accepted")?;
    let mut messages = comm.messages();
    let echo = tokio::spawn({
        let comm = comm.clone();
        async move {
            while let Some(message) = messages.next().await {
                if let Err(e) = comm.send(json!({ "echo": message.data })).await {
                    eprintln!("echo failed: {}", e);
                }
            }
        }
    });

    transport.deliver_message("peer-1", Message::new(json!("hello")));
    tokio::task::yield_now().await;
    transport.deliver_close("peer-1");
    echo.await?;

    let local = comms.open("kernel.target", Some(json!({"ready": true})), Vec::new()).await?;
    local.close().await;

    println!("=== Frames sent to the peer ===");
    for frame in transport.take_sent() {
        println!("{:?}", frame);
    }

    Ok(())
}
