use anyhow::{Context, Result};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::ChannelError;
use crate::models::Listing;

// --- Channel trait ---

pub trait Channel {
    fn send_photo(&self, image_url: &str, caption: &str) -> Result<(), ChannelError>;
    fn send_text(&self, text: &str) -> Result<(), ChannelError>;
}

impl<C: Channel + ?Sized> Channel for &C {
    fn send_photo(&self, image_url: &str, caption: &str) -> Result<(), ChannelError> {
        (**self).send_photo(image_url, caption)
    }

    fn send_text(&self, text: &str) -> Result<(), ChannelError> {
        (**self).send_text(text)
    }
}

// --- Dispatcher ---

/// Sends one alert per listing, pacing itself between successful sends.
pub struct Dispatcher<C> {
    channel: C,
    cooldown: Duration,
    last_sent: Option<Instant>,
}

impl<C: Channel> Dispatcher<C> {
    pub fn new(channel: C, cooldown: Duration) -> Self {
        Self {
            channel,
            cooldown,
            last_sent: None,
        }
    }

    /// Returns false if the alert could not be delivered even as plain text.
    pub fn send(&mut self, listing: &Listing) -> bool {
        self.wait_for_cooldown();

        let sent_at = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let message = format_message(listing, &sent_at);

        if let Some(image_url) = &listing.image_url {
            match self.channel.send_photo(image_url, &message) {
                Ok(()) => {
                    self.last_sent = Some(Instant::now());
                    info!(id = %listing.id, keyword = %listing.keyword, "sent photo alert");
                    return true;
                }
                Err(e) => {
                    warn!(id = %listing.id, error = %e, "photo alert failed, falling back to text");
                }
            }
        }

        match self.channel.send_text(&message) {
            Ok(()) => {
                self.last_sent = Some(Instant::now());
                info!(id = %listing.id, keyword = %listing.keyword, "sent text alert");
                true
            }
            Err(e) => {
                error!(id = %listing.id, keyword = %listing.keyword, error = %e, "failed to send alert");
                false
            }
        }
    }

    fn wait_for_cooldown(&self) {
        if let Some(last) = self.last_sent {
            let elapsed = last.elapsed();
            if elapsed < self.cooldown {
                thread::sleep(self.cooldown - elapsed);
            }
        }
    }
}

pub fn format_message(listing: &Listing, sent_at: &str) -> String {
    let mut message = format!(
        "🚗 *New listing ({})*\n\n\
         📍 *Region:* {}\n\
         🔹 *Title:* {}\n\
         💰 *Price:* {}\n\n",
        escape_markdown(&listing.keyword),
        escape_markdown(listing.region.as_deref().unwrap_or("unknown")),
        escape_markdown(&listing.title),
        escape_markdown(&listing.price),
    );
    if let Some(url) = &listing.url {
        message.push_str(&format!("🔗 [Open listing]({})\n", url));
    }
    message.push_str(&format!("🕒 {}", sent_at));
    message
}

/// Escapes the characters Telegram's legacy Markdown treats as entity markers.
pub fn escape_markdown(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '_' | '*' | '`' | '[') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

// --- Telegram channel ---

const TELEGRAM_API_URL: &str = "https://api.telegram.org";

#[derive(Debug, Serialize)]
struct SendPhotoRequest<'a> {
    chat_id: &'a str,
    photo: &'a str,
    caption: &'a str,
    parse_mode: &'a str,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
    disable_web_page_preview: bool,
}

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

pub struct TelegramChannel {
    token: String,
    chat_id: String,
    client: Client,
}

impl TelegramChannel {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("Failed to create Telegram client")?;
        Ok(Self {
            token: config.telegram_token.clone(),
            chat_id: config.chat_id.clone(),
            client,
        })
    }

    fn call<T: Serialize>(&self, method: &str, body: &T) -> Result<(), ChannelError> {
        let url = format!("{}/bot{}/{}", TELEGRAM_API_URL, self.token, method);
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .map_err(|e| ChannelError::Transport(e.without_url().to_string()))?;

        let status = response.status();
        let parsed: Option<TelegramResponse> = response.json().ok();

        match parsed {
            Some(body) if status.is_success() && body.ok => Ok(()),
            Some(body) => Err(ChannelError::Api {
                status: status.as_u16(),
                description: body.description.unwrap_or_default(),
            }),
            None => Err(ChannelError::Api {
                status: status.as_u16(),
                description: "unreadable response body".to_string(),
            }),
        }
    }
}

impl Channel for TelegramChannel {
    fn send_photo(&self, image_url: &str, caption: &str) -> Result<(), ChannelError> {
        self.call(
            "sendPhoto",
            &SendPhotoRequest {
                chat_id: &self.chat_id,
                photo: image_url,
                caption,
                parse_mode: "Markdown",
            },
        )
    }

    fn send_text(&self, text: &str) -> Result<(), ChannelError> {
        self.call(
            "sendMessage",
            &SendMessageRequest {
                chat_id: &self.chat_id,
                text,
                parse_mode: "Markdown",
                disable_web_page_preview: false,
            },
        )
    }
}
