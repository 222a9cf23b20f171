//! Basic usage example for the wsrpc wire model.

use serde_json::{json, Value};
use wsrpc_wire::{message_id, split_frames, Request, Response};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== wsrpc Wire Example ===\n");

    // 1. Build and encode a request
    println!("1. Encoding a request...");
    let request = Request::new(1u64, "eth_getBalance", Some(json!(["0xabc", "latest"])));
    let text = request.to_text()?;
    println!("   {}", text);

    // 2. Split a frame carrying two responses
    println!("\n2. Splitting a concatenated frame...");
    let frame = r#"{"jsonrpc":"2.0","id":1,"result":"0x10"}
{"jsonrpc":"2.0","id":2,"error":{"code":-32000,"message":"header not found"}}"#;
    let fragments = split_frames(frame);
    println!("   Split into {} fragments", fragments.len());

    // 3. Decode each fragment
    println!("\n3. Decoding responses...");
    for fragment in fragments {
        let value: Value = serde_json::from_str(&fragment)?;
        let id = message_id(&value);
        match Response::from_value(value)?.outcome() {
            Ok(result) => println!("   id {:?} -> result {}", id, result),
            Err(error) => println!("   id {:?} -> error {} ({})", id, error.message, error.code),
        }
    }

    println!("\n=== Example completed successfully! ===");
    Ok(())
}
