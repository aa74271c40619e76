//! GSM modem session over a serial port.
//!
//! A dedicated thread owns the port: it drives the AT init sequence, reads
//! unsolicited result codes (`+CMT` inbound SMS, `+CDS` delivery reports)
//! into [`SmsEvent`]s, serves queued send requests and runs a periodic `AT`
//! health check. Any transport error tears the session down; the thread
//! reopens the port after a fixed delay. The async side talks to the thread
//! through channels only.

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use chrono::Utc;
use serialport::SerialPort;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use rastro_domain::{DeliveryReport, DomainError, DomainResult, InboundSms, SmsSender};

#[derive(Debug, Clone)]
pub enum SmsEvent {
    Inbound(InboundSms),
    Delivery(DeliveryReport),
}

#[derive(Debug, Clone)]
pub struct ModemConfig {
    pub port: String,
    pub baud: u32,
    pub reconnect_delay: Duration,
}

enum ModemCommand {
    SendSms {
        to: String,
        text: String,
        reply: oneshot::Sender<anyhow::Result<String>>,
    },
}

const READ_TIMEOUT: Duration = Duration::from_millis(200);
const INIT_REPLY_WINDOW: Duration = Duration::from_millis(500);
const PROMPT_DEADLINE: Duration = Duration::from_secs(5);
const SEND_DEADLINE: Duration = Duration::from_secs(30);
const HEALTH_CHECK_DEADLINE: Duration = Duration::from_secs(2);
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(60);

// Reset, echo off, full function, text mode, verbose errors, delivery
// reports requested, route SMS and status reports directly to the session.
const INIT_SEQUENCE: &[&str] = &[
    "ATZ",
    "ATE0",
    "AT+CFUN=1",
    "AT+CMGF=1",
    "AT+CMEE=2",
    "AT+CSMP=49,167,0,0",
    "AT+CNMI=2,2,0,1,0",
];

/// Handle to the modem thread. Cloneable; implements [`SmsSender`].
#[derive(Clone)]
pub struct SerialModem {
    commands: mpsc::Sender<ModemCommand>,
}

impl SerialModem {
    /// Spawn the modem thread. Events flow out through `events`; the session
    /// keeps reconnecting until `token` is cancelled.
    pub fn start(
        config: ModemConfig,
        events: mpsc::Sender<SmsEvent>,
        token: CancellationToken,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(16);
        std::thread::Builder::new()
            .name("modem-session".to_string())
            .spawn(move || session_thread(config, events, commands_rx, token))
            .expect("failed to spawn modem thread");
        Self {
            commands: commands_tx,
        }
    }
}

#[async_trait]
impl SmsSender for SerialModem {
    async fn send(&self, destination: &str, text: &str) -> DomainResult<String> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(ModemCommand::SendSms {
                to: destination.to_string(),
                text: text.to_string(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| DomainError::SmsDispatch("modem session is gone".to_string()))?;

        match reply_rx.await {
            Ok(Ok(reference)) => Ok(reference),
            Ok(Err(e)) => Err(DomainError::SmsDispatch(e.to_string())),
            Err(_) => Err(DomainError::SmsDispatch(
                "modem session dropped the request".to_string(),
            )),
        }
    }
}

fn session_thread(
    config: ModemConfig,
    events: mpsc::Sender<SmsEvent>,
    mut commands: mpsc::Receiver<ModemCommand>,
    token: CancellationToken,
) {
    while !token.is_cancelled() {
        match run_session(&config, &events, &mut commands, &token) {
            Ok(()) => break,
            Err(e) => error!(error = %format!("{e:#}"), "modem session ended"),
        }
        if token.is_cancelled() {
            break;
        }
        info!(
            delay_secs = config.reconnect_delay.as_secs(),
            "reopening modem connection"
        );
        std::thread::sleep(config.reconnect_delay);
    }
    debug!("modem thread stopped");
}

fn run_session(
    config: &ModemConfig,
    events: &mpsc::Sender<SmsEvent>,
    commands: &mut mpsc::Receiver<ModemCommand>,
    token: &CancellationToken,
) -> anyhow::Result<()> {
    let port = serialport::new(&config.port, config.baud)
        .timeout(READ_TIMEOUT)
        .open()
        .with_context(|| format!("failed to open modem port {}", config.port))?;
    info!(port = %config.port, baud = config.baud, "modem port opened");

    let mut session = Session {
        port,
        buffer: Vec::new(),
        pending_inbound: None,
        events: events.clone(),
    };
    session.initialize()?;

    let mut last_health_check = Instant::now();
    loop {
        if token.is_cancelled() {
            return Ok(());
        }

        match commands.try_recv() {
            Ok(ModemCommand::SendSms { to, text, reply }) => {
                let result = session.send_sms(&to, &text);
                if let Err(e) = &result {
                    warn!(error = %format!("{e:#}"), "sms send failed");
                }
                let _ = reply.send(result);
            }
            Err(mpsc::error::TryRecvError::Empty) => {}
            // The service side is gone; nothing left to run for.
            Err(mpsc::error::TryRecvError::Disconnected) => return Ok(()),
        }

        if let Some(line) = session.read_line()? {
            session.handle_line(&line);
        }

        if last_health_check.elapsed() >= HEALTH_CHECK_INTERVAL {
            session.health_check()?;
            last_health_check = Instant::now();
        }
    }
}

struct Session {
    port: Box<dyn SerialPort>,
    buffer: Vec<u8>,
    /// Sender of a `+CMT` header whose text body is the next line.
    pending_inbound: Option<String>,
    events: mpsc::Sender<SmsEvent>,
}

impl Session {
    fn initialize(&mut self) -> anyhow::Result<()> {
        for command in INIT_SEQUENCE {
            self.write_line(command)?;
            // Replies are informational during init; a modem that rejects an
            // optional flag still works.
            let deadline = Instant::now() + INIT_REPLY_WINDOW;
            while Instant::now() < deadline {
                match self.read_line()? {
                    Some(line) if line == "OK" => break,
                    Some(line) if line.starts_with("ERROR") || line.starts_with("+CME ERROR") => {
                        warn!(command = %command, reply = %line, "modem rejected init command");
                        break;
                    }
                    Some(line) => debug!(reply = %line, "modem init reply"),
                    None => {}
                }
            }
        }
        info!("modem initialized");
        Ok(())
    }

    fn write_line(&mut self, command: &str) -> anyhow::Result<()> {
        debug!(command = %command, "modem <-");
        self.port
            .write_all(format!("{command}\r").as_bytes())
            .context("modem write failed")?;
        self.port.flush().context("modem flush failed")?;
        Ok(())
    }

    /// Read one CR/LF-terminated line, or `None` when no full line arrived
    /// within the port timeout.
    fn read_line(&mut self) -> anyhow::Result<Option<String>> {
        let mut byte = [0u8; 1];
        loop {
            if let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
                let raw: Vec<u8> = self.buffer.drain(..=newline).collect();
                let line = String::from_utf8_lossy(&raw).trim().to_string();
                if line.is_empty() {
                    continue;
                }
                return Ok(Some(line));
            }
            match self.port.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => self.buffer.push(byte[0]),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => return Ok(None),
                Err(e) => return Err(e).context("modem read failed"),
            }
        }
    }

    fn handle_line(&mut self, line: &str) {
        if let Some(sender) = self.pending_inbound.take() {
            debug!(sender = %sender, "sms received");
            let _ = self.events.blocking_send(SmsEvent::Inbound(InboundSms {
                sender,
                text: line.to_string(),
                received_at: Utc::now(),
            }));
            return;
        }

        if let Some(header) = line.strip_prefix("+CMT:") {
            match first_quoted(header) {
                Some(sender) => self.pending_inbound = Some(sender),
                None => warn!(line = %line, "unparseable +CMT header"),
            }
            return;
        }

        if let Some(report) = line.strip_prefix("+CDS:") {
            match parse_status_report(report) {
                Some(event) => {
                    let _ = self.events.blocking_send(event);
                }
                None => warn!(line = %line, "unparseable +CDS report"),
            }
            return;
        }

        debug!(line = %line, "modem ->");
    }

    /// Wait for a specific token, routing unsolicited lines normally.
    fn wait_for(&mut self, wanted: &str, deadline: Duration) -> anyhow::Result<String> {
        let end = Instant::now() + deadline;
        while Instant::now() < end {
            if let Some(line) = self.read_line()? {
                if line.starts_with(wanted) {
                    return Ok(line);
                }
                if line.starts_with("ERROR") || line.starts_with("+CMS ERROR") {
                    bail!("modem returned {line}");
                }
                self.handle_line(&line);
            }
        }
        bail!("timed out waiting for {wanted}")
    }

    fn send_sms(&mut self, to: &str, text: &str) -> anyhow::Result<String> {
        self.write_line(&format!("AT+CMGS=\"{to}\""))?;
        self.wait_for_prompt()?;

        debug!(to = %to, text = %text, "sending sms");
        self.port
            .write_all(text.as_bytes())
            .context("modem write failed")?;
        // Ctrl-Z terminates the message body.
        self.port.write_all(&[0x1A]).context("modem write failed")?;
        self.port.flush().context("modem flush failed")?;

        let confirmation = self.wait_for("+CMGS:", SEND_DEADLINE)?;
        let reference = confirmation
            .trim_start_matches("+CMGS:")
            .trim()
            .to_string();
        if reference.is_empty() {
            bail!("send confirmation carried no reference");
        }
        Ok(reference)
    }

    /// The `>` prompt is not line-terminated, so it cannot go through
    /// `read_line`.
    fn wait_for_prompt(&mut self) -> anyhow::Result<()> {
        let end = Instant::now() + PROMPT_DEADLINE;
        let mut byte = [0u8; 1];
        while Instant::now() < end {
            match self.port.read(&mut byte) {
                Ok(0) => {}
                Ok(_) => {
                    if byte[0] == b'>' {
                        return Ok(());
                    }
                    self.buffer.push(byte[0]);
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => return Err(e).context("modem read failed"),
            }
        }
        bail!("timed out waiting for send prompt")
    }

    fn health_check(&mut self) -> anyhow::Result<()> {
        self.write_line("AT")?;
        self.wait_for("OK", HEALTH_CHECK_DEADLINE)
            .map(|_| ())
            .map_err(|e| anyhow!("modem health check failed: {e}"))
    }
}

fn first_quoted(text: &str) -> Option<String> {
    let start = text.find('"')? + 1;
    let end = start + text[start..].find('"')?;
    Some(text[start..end].to_string())
}

/// Text-mode SMS-STATUS-REPORT:
/// `+CDS: <fo>,<mr>,"<recipient>",<tora>,"<scts>","<dt>",<st>`
fn parse_status_report(report: &str) -> Option<SmsEvent> {
    let fields = split_respecting_quotes(report);
    if fields.len() < 3 {
        return None;
    }
    let reference = fields[1].trim().to_string();
    if reference.is_empty() {
        return None;
    }
    let sender = fields[2].trim().trim_matches('"').to_string();
    // <st> 0 means delivered; anything else is a failure class.
    let delivered = fields
        .last()
        .map(|status| status.trim() == "0")
        .unwrap_or(false);

    Some(SmsEvent::Delivery(DeliveryReport {
        reference,
        sender,
        delivered,
        received_at: Utc::now(),
    }))
}

fn split_respecting_quotes(text: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in text.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            ',' if !in_quotes => {
                fields.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_quoted_extracts_sender() {
        assert_eq!(
            first_quoted(" \"+5511987654321\",,\"21/02/06,14:05:10+08\""),
            Some("+5511987654321".to_string())
        );
        assert_eq!(first_quoted("no quotes here"), None);
    }

    #[test]
    fn test_status_report_delivered() {
        let event = parse_status_report(" 6,41,\"+5511987654321\",145,\"18/02/01,12:27:00+00\",\"18/02/01,12:27:05+00\",0");
        match event {
            Some(SmsEvent::Delivery(report)) => {
                assert_eq!(report.reference, "41");
                assert_eq!(report.sender, "+5511987654321");
                assert!(report.delivered);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_status_report_failure_class() {
        let event = parse_status_report(" 6,42,\"+5511987654321\",145,\"18/02/01,12:27:00+00\",\"18/02/01,12:27:05+00\",70");
        match event {
            Some(SmsEvent::Delivery(report)) => {
                assert_eq!(report.reference, "42");
                assert!(!report.delivered);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_status_report_with_quoted_commas() {
        // Timestamps contain commas inside quotes; the splitter must not
        // break on them.
        let fields = split_respecting_quotes("6,41,\"+55\",145,\"18/02/01,12:27:00+00\",0");
        assert_eq!(fields.len(), 6);
        assert_eq!(fields[4], "\"18/02/01,12:27:00+00\"");
    }

    #[test]
    fn test_malformed_status_report() {
        assert!(parse_status_report(" 6").is_none());
        assert!(parse_status_report("").is_none());
    }
}
