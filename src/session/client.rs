use super::*;

use crate::config::SessionConfig;

/// Port used when a device identifier carries none.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Lines printed by an `ssh` client on a jump host when the hop fails.
static HOP_FAILURE: Lazy<RegexSet> = Lazy::new(|| {
    match RegexSet::new([
        r"(?i)^ssh: connect to host .+",
        r"(?i)^ssh: Could not resolve hostname .+",
        r"(?i)Connection (refused|timed out|closed by .+)",
        r"(?i)No route to host",
        r"(?i)Host key verification failed",
        r"(?i)Permission denied",
    ]) {
        Ok(set) => set,
        Err(err) => panic!("invalid HOP_FAILURE regex set: {err}"),
    }
});

/// Splits `host:port` into its parts; anything else is a bare host on port 22.
///
/// Bracketed IPv6 (`[fe80::1]:2222`) is accepted, bare IPv6 is treated as a host.
pub fn split_host_port(address: &str) -> (&str, u16) {
    let address = address.trim();
    if let Some(rest) = address.strip_prefix('[')
        && let Some((host, port)) = rest.split_once("]:")
        && let Ok(port) = port.parse::<u16>()
    {
        return (host, port);
    }
    if let Some((host, port)) = address.split_once(':')
        && !port.contains(':')
        && let Ok(port) = port.parse::<u16>()
    {
        return (host, port);
    }
    (address, DEFAULT_SSH_PORT)
}

fn hop_command(username: &str, host: &str, port: u16) -> String {
    if port == DEFAULT_SSH_PORT {
        format!("ssh -l {username} {host}\n")
    } else {
        format!("ssh -l {username} -p {port} {host}\n")
    }
}

fn clean_prompt(line: &str) -> String {
    IGNORE_START_LINE
        .replace(line, "")
        .trim_matches(|c: char| c == '\0' || c.is_whitespace())
        .to_string()
}

/// Drops the echoed command line from captured output.
fn strip_echo<'a>(output: &'a str, command: &str) -> &'a str {
    let (first, rest) = output.split_once('\n').unwrap_or((output, ""));
    if !command.is_empty() && first.trim_end().ends_with(command.trim()) {
        rest
    } else {
        output
    }
}

struct ShellRead {
    /// Prompt line that ended the read.
    prompt: String,
    /// Whether any line matched an error pattern.
    error: bool,
}

/// Reads shell output until `handler` recognizes a prompt.
///
/// Complete lines are appended to `collected`; interactive questions are
/// answered on the way. Lines matching `fail_on` abort the read.
async fn read_until_prompt(
    sender: &Sender<String>,
    recv: &mut Receiver<String>,
    handler: &mut PromptHandler,
    fail_on: Option<&RegexSet>,
    collected: &mut String,
) -> Result<ShellRead, ConnectError> {
    let mut line_buffer = String::new();
    let mut line = String::new();
    let mut is_error = false;
    let mut password_answers = 0usize;

    loop {
        let Some(data) = recv.recv().await else {
            return Err(ConnectError::ChannelDisconnectError);
        };
        trace!("{:?}", data);
        line_buffer.push_str(&data);

        while let Some(newline_pos) = line_buffer.find('\n') {
            line.clear();
            line.extend(line_buffer.drain(..=newline_pos));
            let trim_start = IGNORE_START_LINE.replace(&line, "");
            let trimmed_line = trim_start.trim_end();

            if let Some(set) = fail_on
                && set.is_match(trimmed_line)
            {
                return Err(ConnectError::JumpHostError(trimmed_line.to_string()));
            }

            handler.read(trimmed_line);
            if handler.error() {
                is_error = true;
            }
            collected.push_str(&trim_start);
        }

        // The prompt usually arrives without a trailing newline.
        if line_buffer.is_empty() {
            continue;
        }
        if handler.read_prompt(&line_buffer) {
            handler.read(&line_buffer);
            return Ok(ShellRead {
                prompt: line_buffer,
                error: is_error,
            });
        }
        if let Some((answer, is_record)) = handler.read_need_write(&line_buffer) {
            handler.read(&line_buffer);
            if handler.current_state() == "password" {
                password_answers += 1;
                if password_answers > 1 {
                    return Err(ConnectError::AuthenticationFailed(
                        "password prompted again after answering".to_string(),
                    ));
                }
            }
            if !is_record {
                line_buffer.clear();
            }
            trace!("Input required: '{:?}'", answer);
            sender.send(answer).await?;
        }
    }
}

/// Opens interactive SSH shell sessions on network devices.
#[derive(Debug, Clone)]
pub struct SshOpener {
    handler: PromptHandler,
    jump_handler: PromptHandler,
    paging_command: Option<String>,
    security_options: ConnectionSecurityOptions,
    connect_timeout: Duration,
    command_timeout: Duration,
}

impl SshOpener {
    /// Creates an opener using a built-in prompt template.
    pub fn new(template: &str) -> Result<Self, ConnectError> {
        let handler = templates::by_name(template)?;
        let metadata = templates::template_metadata(template)?;
        Ok(Self {
            handler,
            jump_handler: templates::linux()?,
            paging_command: metadata.paging_command,
            security_options: ConnectionSecurityOptions::default(),
            connect_timeout: Duration::from_secs(60),
            command_timeout: Duration::from_secs(60),
        })
    }

    /// Creates an opener from the template and security level of a session config.
    pub fn from_session_config(config: &SessionConfig) -> Result<Self, ConnectError> {
        let template = config
            .device_template
            .as_deref()
            .unwrap_or(templates::DEFAULT_TEMPLATE);
        let level = config.security_level.unwrap_or_default();
        Ok(Self::new(template)?.with_security(level.into()))
    }

    /// Uses a custom prompt handler instead of a built-in template.
    pub fn with_handler(mut self, handler: PromptHandler) -> Self {
        self.handler = handler;
        self
    }

    pub fn with_security(mut self, security_options: ConnectionSecurityOptions) -> Self {
        self.security_options = security_options;
        self
    }

    /// Overrides the paging-disable command; `None` sends nothing.
    pub fn with_paging_command(mut self, command: Option<String>) -> Self {
        self.paging_command = command;
        self
    }

    /// Time allowed for TCP connect, authentication and each login prompt.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    async fn wait_prompt(
        &self,
        sender: &Sender<String>,
        recv: &mut Receiver<String>,
        handler: &mut PromptHandler,
        fail_on: Option<&RegexSet>,
    ) -> Result<ShellRead, ConnectError> {
        let mut collected = String::new();
        let result = tokio::time::timeout(
            self.connect_timeout,
            read_until_prompt(sender, recv, handler, fail_on, &mut collected),
        )
        .await;

        match result {
            Ok(read) => read,
            Err(_) => Err(ConnectError::InitTimeout(if collected.is_empty() {
                "waiting for initial prompt".to_string()
            } else {
                collected
            })),
        }
    }

    async fn connect(
        &self,
        hostname: &str,
        credentials: &Credentials,
        proxy: Option<&ProxyCredentials>,
    ) -> Result<SshSession, ConnectError> {
        let (host, port) = split_host_port(hostname);
        let (addr, addr_port, user, password) = match proxy {
            Some(jump) => {
                let (jump_host, jump_port) = split_host_port(&jump.hostname);
                (jump_host, jump_port, &jump.username, &jump.password)
            }
            None => (host, port, &credentials.username, &credentials.password),
        };
        let device_addr = format!("{user}@{addr}:{addr_port}");

        let config = Config {
            preferred: self.security_options.preferred(),
            inactivity_timeout: Some(Duration::from_secs(60)),
            ..Default::default()
        };

        let client = tokio::time::timeout(
            self.connect_timeout,
            Client::connect_with_config(
                (addr.to_string(), addr_port),
                user,
                AuthMethod::with_password(password),
                self.security_options.server_check.clone(),
                config,
            ),
        )
        .await
        .map_err(|_| ConnectError::InitTimeout(format!("connecting to {device_addr}")))??;
        debug!("{} TCP connection successful", device_addr);

        let mut channel = client.get_channel().await?;
        channel
            .request_pty(false, "xterm", 800, 600, 0, 0, &[])
            .await?;
        channel.request_shell(false).await?;
        debug!("{} Shell request successful", device_addr);

        let (sender_to_shell, mut receiver_from_user) = mpsc::channel::<String>(256);
        let (sender_to_user, mut receiver_from_shell) = mpsc::channel::<String>(256);

        let io_task_device_addr = device_addr.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(data) = receiver_from_user.recv() => {
                        if let Err(e) = channel.data(data.as_bytes()).await {
                            debug!("{} Failed to send data to shell: {:?}", io_task_device_addr, e);
                            break;
                        }
                    },
                    Some(msg) = channel.wait() => {
                        match msg {
                            ChannelMsg::Data { ref data } => {
                                let chunk = String::from_utf8_lossy(data).into_owned();
                                if sender_to_user.send(chunk).await.is_err() {
                                    debug!("{} Shell output receiver dropped. Closing task.", io_task_device_addr);
                                    break;
                                }
                            }
                            ChannelMsg::ExitStatus { exit_status } => {
                                debug!("{} Shell exited with status code: {}", io_task_device_addr, exit_status);
                                let _ = channel.eof().await;
                                break;
                            }
                            ChannelMsg::Eof => {
                                debug!("{} Shell sent EOF.", io_task_device_addr);
                                break;
                            }
                            _ => {}
                        }
                    }
                    else => break,
                }
            }
            debug!("{} SSH I/O task ended.", io_task_device_addr);
        });

        let mut handler = self.handler.clone();
        let login = match proxy {
            None => {
                self.wait_prompt(&sender_to_shell, &mut receiver_from_shell, &mut handler, None)
                    .await?
            }
            Some(_) => {
                let mut jump_handler = self.jump_handler.clone();
                self.wait_prompt(
                    &sender_to_shell,
                    &mut receiver_from_shell,
                    &mut jump_handler,
                    None,
                )
                .await?;
                debug!("{} Jump host shell ready, hopping to {}", device_addr, hostname);

                handler.dyn_param.insert(
                    templates::PASSWORD_PARAM.to_string(),
                    format!("{}\n", credentials.password),
                );
                sender_to_shell
                    .send(hop_command(&credentials.username, host, port))
                    .await?;
                let login = self
                    .wait_prompt(
                        &sender_to_shell,
                        &mut receiver_from_shell,
                        &mut handler,
                        Some(&HOP_FAILURE),
                    )
                    .await?;
                handler.dyn_param.remove(templates::PASSWORD_PARAM);
                login
            }
        };

        let mut session = SshSession {
            device: hostname.to_string(),
            client,
            sender: sender_to_shell,
            recv: receiver_from_shell,
            handler,
            prompt: clean_prompt(&login.prompt),
            command_timeout: self.command_timeout,
            hops: if proxy.is_some() { 2 } else { 1 },
            closed: false,
        };
        debug!("{} Logged in, prompt '{}'", hostname, session.prompt);

        if let Some(paging) = self.paging_command.as_deref() {
            session.exec(paging).await?;
        }

        Ok(session)
    }
}

impl SessionOpener for SshOpener {
    type Session = SshSession;

    async fn open(
        &self,
        hostname: &str,
        credentials: &Credentials,
        proxy: Option<&ProxyCredentials>,
    ) -> Result<SshSession, ConnectError> {
        self.connect(hostname, credentials, proxy).await
    }
}

/// An interactive SSH shell logged into one device.
pub struct SshSession {
    device: String,
    client: Client,
    sender: Sender<String>,
    recv: Receiver<String>,
    handler: PromptHandler,
    prompt: String,
    command_timeout: Duration,
    /// Number of shells to exit on close (device, plus jump host).
    hops: usize,
    closed: bool,
}

impl SshSession {
    /// Checks if the underlying SSH connection is still active.
    pub fn is_connected(&self) -> bool {
        !self.closed && !self.client.is_closed()
    }

    /// Runs a command and returns its cleaned output.
    async fn exec(&mut self, command: &str) -> Result<String, ConnectError> {
        if !self.is_connected() {
            return Err(ConnectError::ConnectClosedError);
        }

        // Drop anything the device printed since the last prompt.
        while self.recv.try_recv().is_ok() {}
        self.handler.reset();

        self.sender.send(format!("{command}\n")).await?;

        let mut collected = String::new();
        let result = tokio::time::timeout(
            self.command_timeout,
            read_until_prompt(
                &self.sender,
                &mut self.recv,
                &mut self.handler,
                None,
                &mut collected,
            ),
        )
        .await;

        let read = match result {
            Ok(read) => read?,
            Err(_) => return Err(ConnectError::ExecTimeout(collected)),
        };
        if read.error {
            warn!("{} reported an error for '{}'", self.device, command);
        }
        let prompt = clean_prompt(&read.prompt);
        if prompt != self.prompt {
            debug!("{} prompt changed to '{}'", self.device, prompt);
        }

        Ok(strip_echo(&collected, command).replace("\r\n", "\n"))
    }
}

/// Exits every shell level, then tears the SSH connection down.
async fn shut_down<E: std::fmt::Debug>(
    device: &str,
    hops: usize,
    sender: &Sender<String>,
    disconnect: impl Future<Output = Result<(), E>>,
) {
    for _ in 0..hops {
        if let Err(e) = sender.send("exit\n".to_string()).await {
            debug!("{} Failed to send exit command: {:?}", device, e);
            break;
        }
    }
    // Give the device a moment to process the exit.
    tokio::time::sleep(Duration::from_millis(100)).await;
    if let Err(e) = disconnect.await {
        debug!("{} SSH disconnect failed: {:?}", device, e);
    }
}

impl DeviceSession for SshSession {
    fn prompt(&self) -> &str {
        &self.prompt
    }

    async fn send_command(&mut self, command: &str) -> Result<String, ConnectError> {
        self.exec(command).await
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        debug!("{} Closing SSH session", self.device);

        if !self.client.is_closed() {
            shut_down(
                &self.device,
                self.hops,
                &self.sender,
                self.client.disconnect(),
            )
            .await;
        }
        self.recv.close();
        self.closed = true;
        debug!("{} SSH session closed", self.device);
    }
}
