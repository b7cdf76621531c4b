mod webhook;

pub use webhook::{SIGNATURE_HEADER, WebhookEventHandler, sign_payload};
