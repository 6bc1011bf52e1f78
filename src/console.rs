//! # Command Console
//!
//! Line-oriented commands that drive the rig from a terminal.
//!
//! ```text
//! ports                              list serial ports
//! connect [port] [baud]              autodetect baud and handshake
//! disconnect
//! status
//! controllers                        refresh and list input sources
//! select v|<index>
//! map <servo> <axis|button|hat> <index> [v|<controller>]
//! unmap <servo>
//! mappings
//! key <left|right|up|down> <down|up>
//! drag <deg> / release
//! set sensitivity|autocenter|maxangle|maxthrottle <value>
//! help
//! quit
//! ```
//!
//! A line that fails to parse changes nothing.

use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::{info, warn};

use crate::controller::aggregator::{InputAggregator, InputSource};
use crate::controller::virtual_wheel::ArrowKey;
use crate::display;
use crate::error::{Result, ServoRigError};
use crate::mapping::{MappingRequest, MappingSet};
use crate::serial::{ConnectOutcome, DeviceLink};

pub const HELP: &str = "\
Commands:
  ports                                   List serial ports
  connect [port] [baud]                   Connect (baud is the fallback if autodetect fails)
  disconnect                              Close the serial link
  status                                  Link, wheel and input status
  controllers                             Refresh and list input sources
  select v|<index>                        Select the input source
  map <servo> <axis|button|hat> <index> [v|<controller>]
  unmap <servo>                           Remove a servo mapping
  mappings                                List servo mappings
  key <left|right|up|down> <down|up>      Hold or release an arrow key
  drag <deg>                              Drag the virtual wheel to a pointer angle
  release                                 End the drag
  set sensitivity|autocenter|maxangle|maxthrottle <value>
  help                                    Show this help
  quit                                    Exit";

/// Virtual controller setting changed by `set`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    Sensitivity,
    AutoCenter,
    MaxAngle,
    MaxThrottle,
}

impl FromStr for Setting {
    type Err = ServoRigError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sensitivity" => Ok(Setting::Sensitivity),
            "autocenter" => Ok(Setting::AutoCenter),
            "maxangle" => Ok(Setting::MaxAngle),
            "maxthrottle" => Ok(Setting::MaxThrottle),
            other => Err(invalid(format!(
                "unknown setting '{}' (expected sensitivity, autocenter, maxangle or maxthrottle)",
                other
            ))),
        }
    }
}

/// One parsed console line.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Ports,
    Connect {
        port: Option<String>,
        baud_rate: Option<u32>,
    },
    Disconnect,
    Status,
    Controllers,
    Select(InputSource),
    /// Fields stay as typed; they are validated against the current
    /// selection when the command runs.
    Map {
        servo_id: String,
        kind: String,
        index: String,
        source: Option<InputSource>,
    },
    Unmap(u8),
    Mappings,
    Key {
        key: ArrowKey,
        pressed: bool,
    },
    Drag(f64),
    Release,
    Set(Setting, f64),
    Help,
    Quit,
}

fn invalid(message: impl Into<String>) -> ServoRigError {
    ServoRigError::InvalidCommand(message.into())
}

/// Parses `v` or a controller index.
pub fn parse_source(token: &str) -> Result<InputSource> {
    if token.eq_ignore_ascii_case("v") || token.eq_ignore_ascii_case("virtual") {
        return Ok(InputSource::Virtual);
    }
    token
        .parse()
        .map(InputSource::External)
        .map_err(|_| invalid(format!("'{}' is not a controller (use v or an index)", token)))
}

fn parse_key(token: &str) -> Result<ArrowKey> {
    match token.to_ascii_lowercase().as_str() {
        "left" => Ok(ArrowKey::Left),
        "right" => Ok(ArrowKey::Right),
        "up" => Ok(ArrowKey::Up),
        "down" => Ok(ArrowKey::Down),
        other => Err(invalid(format!("unknown key '{}'", other))),
    }
}

fn parse_number<T: FromStr>(token: &str, what: &str) -> Result<T> {
    token
        .parse()
        .map_err(|_| invalid(format!("{} '{}' is not a number", what, token)))
}

fn expect_args(args: &[&str], min: usize, max: usize, usage: &str) -> Result<()> {
    if args.len() < min || args.len() > max {
        return Err(invalid(format!("usage: {}", usage)));
    }
    Ok(())
}

impl FromStr for Command {
    type Err = ServoRigError;

    fn from_str(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let Some(name) = words.next() else {
            return Err(invalid("empty command"));
        };
        let args: Vec<&str> = words.collect();

        let command = match name.to_ascii_lowercase().as_str() {
            "ports" => Command::Ports,
            "connect" => {
                expect_args(&args, 0, 2, "connect [port] [baud]")?;
                Command::Connect {
                    port: args.first().map(|p| p.to_string()),
                    baud_rate: args.get(1).map(|b| parse_number(b, "baud")).transpose()?,
                }
            }
            "disconnect" => Command::Disconnect,
            "status" => Command::Status,
            "controllers" => Command::Controllers,
            "select" => {
                expect_args(&args, 1, 1, "select v|<index>")?;
                Command::Select(parse_source(args[0])?)
            }
            "map" => {
                expect_args(&args, 3, 4, "map <servo> <axis|button|hat> <index> [v|<controller>]")?;
                Command::Map {
                    servo_id: args[0].to_string(),
                    kind: args[1].to_string(),
                    index: args[2].to_string(),
                    source: args.get(3).map(|s| parse_source(s)).transpose()?,
                }
            }
            "unmap" => {
                expect_args(&args, 1, 1, "unmap <servo>")?;
                Command::Unmap(parse_number(args[0], "servo id")?)
            }
            "mappings" => Command::Mappings,
            "key" => {
                expect_args(&args, 2, 2, "key <left|right|up|down> <down|up>")?;
                let pressed = match args[1].to_ascii_lowercase().as_str() {
                    "down" | "press" => true,
                    "up" | "release" => false,
                    other => return Err(invalid(format!("key state '{}' must be down or up", other))),
                };
                Command::Key {
                    key: parse_key(args[0])?,
                    pressed,
                }
            }
            "drag" => {
                expect_args(&args, 1, 1, "drag <deg>")?;
                let degrees: f64 = parse_number(args[0], "angle")?;
                if !degrees.is_finite() {
                    return Err(invalid("angle must be finite"));
                }
                Command::Drag(degrees)
            }
            "release" => Command::Release,
            "set" => {
                expect_args(&args, 2, 2, "set sensitivity|autocenter|maxangle|maxthrottle <value>")?;
                let value: f64 = parse_number(args[1], "value")?;
                if !value.is_finite() {
                    return Err(invalid("value must be finite"));
                }
                Command::Set(args[0].parse()?, value)
            }
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => return Err(invalid(format!("unknown command '{}' (try help)", other))),
        };

        Ok(command)
    }
}

/// Runs console commands against the shared rig state.
pub struct Console {
    aggregator: Arc<Mutex<InputAggregator>>,
    link: Arc<tokio::sync::Mutex<DeviceLink>>,
    mappings: watch::Sender<Arc<MappingSet>>,
    selected: watch::Sender<InputSource>,
    default_port: String,
    default_baud: u32,
}

impl Console {
    pub fn new(
        aggregator: Arc<Mutex<InputAggregator>>,
        link: Arc<tokio::sync::Mutex<DeviceLink>>,
        mappings: watch::Sender<Arc<MappingSet>>,
        selected: watch::Sender<InputSource>,
        default_port: String,
        default_baud: u32,
    ) -> Self {
        Self {
            aggregator,
            link,
            mappings,
            selected,
            default_port,
            default_baud,
        }
    }

    fn aggregator(&self) -> MutexGuard<'_, InputAggregator> {
        self.aggregator.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs one command and returns the lines to show.
    ///
    /// # Errors
    ///
    /// Returns `InvalidMapping` or `InvalidCommand` when the command's
    /// arguments don't fit the current state, `Serial` when ports cannot be
    /// listed, and `NotConnected`/`SerialPortNotFound` from connect.
    pub async fn execute(&self, command: Command) -> Result<Vec<String>> {
        match command {
            Command::Ports => {
                let ports = self.link.lock().await.available_ports()?;
                if ports.is_empty() {
                    Ok(vec!["No serial ports found".to_string()])
                } else {
                    Ok(ports)
                }
            }
            Command::Connect { port, baud_rate } => self.connect(port, baud_rate).await,
            Command::Disconnect => {
                self.link.lock().await.disconnect();
                Ok(vec!["Disconnected".to_string()])
            }
            Command::Status => self.status().await,
            Command::Controllers => {
                let mut aggregator = self.aggregator();
                aggregator.refresh();
                Ok(aggregator.labels().into_iter().map(|(_, label)| label).collect())
            }
            Command::Select(source) => {
                let aggregator = self.aggregator();
                let Some(info) = aggregator.info(source) else {
                    return Err(invalid(format!("no controller at index {}", source_index(source))));
                };
                self.selected.send_replace(source);
                info!("Selected {}", info.name);
                Ok(vec![format!(
                    "Selected {} ({} axes, {} buttons, {} hats)",
                    info.name, info.num_axes, info.num_buttons, info.num_hats
                )])
            }
            Command::Map {
                servo_id,
                kind,
                index,
                source,
            } => {
                let source = source.unwrap_or_else(|| *self.selected.borrow());
                let mapping = MappingRequest {
                    servo_id: &servo_id,
                    kind: &kind,
                    index: &index,
                    source,
                }
                .parse()?;

                if !self.aggregator().contains(source) {
                    return Err(ServoRigError::InvalidMapping(format!(
                        "{} is not connected",
                        source
                    )));
                }

                let mut replaced = None;
                self.mappings.send_modify(|set| {
                    let mut next = MappingSet::clone(set);
                    replaced = next.insert(mapping);
                    *set = Arc::new(next);
                });

                let mut lines = vec![format!(
                    "Mapped servo {} → {} {} ({})",
                    mapping.servo_id(),
                    mapping.kind,
                    mapping.index,
                    mapping.source
                )];
                if let Some(old) = replaced {
                    lines.push(format!(
                        "  replaced {} {} ({})",
                        old.kind, old.index, old.source
                    ));
                }
                Ok(lines)
            }
            Command::Unmap(servo_id) => {
                let mut removed = None;
                self.mappings.send_if_modified(|set| {
                    if set.get(servo_id).is_none() {
                        return false;
                    }
                    let mut next = MappingSet::clone(set);
                    removed = next.remove(servo_id);
                    *set = Arc::new(next);
                    true
                });
                Ok(vec![match removed {
                    Some(_) => format!("Removed mapping for servo {}", servo_id),
                    None => format!("Servo {} was not mapped", servo_id),
                }])
            }
            Command::Mappings => {
                let lines = display::mapping_lines(&self.mappings.borrow());
                if lines.is_empty() {
                    Ok(vec!["No mappings".to_string()])
                } else {
                    Ok(lines)
                }
            }
            Command::Key { key, pressed } => {
                self.aggregator()
                    .virtual_controller_mut()
                    .set_key(key, pressed);
                Ok(Vec::new())
            }
            Command::Drag(degrees) => {
                let mut aggregator = self.aggregator();
                let controller = aggregator.virtual_controller_mut();
                if controller.is_dragging() {
                    controller.drag_to(degrees);
                } else {
                    controller.begin_drag(degrees);
                }
                Ok(vec![display::wheel_label(controller.wheel())])
            }
            Command::Release => {
                self.aggregator().virtual_controller_mut().end_drag();
                Ok(Vec::new())
            }
            Command::Set(setting, value) => Ok(vec![self.apply_setting(setting, value)]),
            Command::Help => Ok(HELP.lines().map(str::to_string).collect()),
            Command::Quit => Ok(Vec::new()),
        }
    }

    async fn connect(&self, port: Option<String>, baud_rate: Option<u32>) -> Result<Vec<String>> {
        let mut link = self.link.lock().await;

        let port = match port.or_else(|| Some(self.default_port.clone()).filter(|p| !p.is_empty())) {
            Some(port) => port,
            None => link
                .available_ports()?
                .into_iter()
                .next()
                .ok_or_else(|| ServoRigError::SerialPortNotFound("no serial ports present".to_string()))?,
        };
        let baud_rate = baud_rate.unwrap_or(self.default_baud);

        match link.connect(&port, baud_rate).await {
            Ok(ConnectOutcome::Confirmed { baud_rate }) => {
                Ok(vec![format!("Connected: {} at {} baud", port, baud_rate)])
            }
            Ok(ConnectOutcome::Unconfirmed {
                baud_rate,
                startup_lines,
            }) => {
                let mut lines = vec![
                    format!("Connected: {} at {} baud, but the device did not send READY", port, baud_rate),
                    "Warning: servos may be drawing too much power; try disconnecting them and reconnecting"
                        .to_string(),
                ];
                lines.extend(startup_lines.into_iter().map(|line| format!("  device: {}", line)));
                Ok(lines)
            }
            Err(e) => {
                warn!("Connection to {} failed: {}", port, e);
                Ok(vec![
                    format!("Connection failed: {}", e),
                    "Check that the board is powered and the servos aren't drawing too much current"
                        .to_string(),
                ])
            }
        }
    }

    async fn status(&self) -> Result<Vec<String>> {
        let stats = self.link.lock().await.stats();
        let source = *self.selected.borrow();

        let mut lines = vec![display::status_line(&stats)];
        lines.extend(display::response_line(&stats));
        if let Some(error) = &stats.last_error {
            lines.push(format!("Last error: {}", error));
        }

        let mut aggregator = self.aggregator();
        let controller = aggregator.virtual_controller();
        lines.push(format!(
            "Wheel: {} (max {}) | Throttle: {} (max {})",
            display::wheel_label(controller.wheel()),
            display::max_angle_label(controller.wheel().max_angle()),
            display::wheel_label(controller.throttle()),
            display::max_angle_label(controller.throttle().max_angle()),
        ));
        lines.push(format!(
            "Sensitivity: {:.3} | Auto-center: {:.2}",
            controller.wheel().key_sensitivity(),
            controller.wheel().auto_center_speed()
        ));
        lines.push(format!("Source: {}", source));

        match aggregator.state(source) {
            Some(snapshot) => lines.extend(display::input_report(&snapshot).lines().map(str::to_string)),
            None => lines.push(format!("{} is no longer connected", source)),
        }
        Ok(lines)
    }

    fn apply_setting(&self, setting: Setting, value: f64) -> String {
        let mut aggregator = self.aggregator();
        let controller = aggregator.virtual_controller_mut();
        match setting {
            Setting::Sensitivity => {
                controller.set_key_sensitivity(value);
                format!("Sensitivity: {:.3}", controller.wheel().key_sensitivity())
            }
            Setting::AutoCenter => {
                controller.set_auto_center_speed(value);
                format!("Auto-center: {:.2}", controller.wheel().auto_center_speed())
            }
            Setting::MaxAngle => {
                controller.wheel_mut().set_max_angle(value);
                format!(
                    "Max angle: {}",
                    display::max_angle_label(controller.wheel().max_angle())
                )
            }
            Setting::MaxThrottle => {
                controller.throttle_mut().set_max_angle(value);
                format!(
                    "Max throttle: {}",
                    display::max_angle_label(controller.throttle().max_angle())
                )
            }
        }
    }
}

fn source_index(source: InputSource) -> String {
    match source {
        InputSource::Virtual => "v".to_string(),
        InputSource::External(index) => index.to_string(),
    }
}
