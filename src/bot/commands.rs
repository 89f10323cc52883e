/// Comandos de texto reconocidos, ya validados.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Play(String),
    Skip,
    Stop,
    Pause,
    Resume,
    Volume(Option<u32>),
    Queue(usize),
    Remove(usize),
    Move { from: usize, to: usize },
    Shuffle,
    Repeat,
    Clear,
    NowPlaying,
    Disconnect,
    Reconnect,
    Status,
    Help,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Play(_) => "play",
            Command::Skip => "skip",
            Command::Stop => "stop",
            Command::Pause => "pause",
            Command::Resume => "resume",
            Command::Volume(_) => "volume",
            Command::Queue(_) => "queue",
            Command::Remove(_) => "remove",
            Command::Move { .. } => "move",
            Command::Shuffle => "shuffle",
            Command::Repeat => "repeat",
            Command::Clear => "clear",
            Command::NowPlaying => "nowplaying",
            Command::Disconnect => "disconnect",
            Command::Reconnect => "reconnect",
            Command::Status => "status",
            Command::Help => "help",
        }
    }
}

/// Interpreta un mensaje. `None` si no es un comando nuestro; `Some(Err(uso))` si los
/// argumentos no son válidos.
pub fn parse(content: &str, prefix: &str) -> Option<Result<Command, String>> {
    let rest = content.trim().strip_prefix(prefix)?;
    let mut parts = rest.split_whitespace();
    let name = parts.next()?.to_lowercase();
    let args: Vec<&str> = parts.collect();

    let command = match name.as_str() {
        "play" | "p" => {
            if args.is_empty() {
                Err(format!("Uso: `{}play <canción o URL>`", prefix))
            } else {
                Ok(Command::Play(args.join(" ")))
            }
        }
        "skip" | "s" => Ok(Command::Skip),
        "stop" => Ok(Command::Stop),
        "pause" => Ok(Command::Pause),
        "resume" => Ok(Command::Resume),
        "volume" | "vol" => match args.first() {
            None => Ok(Command::Volume(None)),
            Some(arg) => number(arg)
                .map(|v| Command::Volume(Some(v)))
                .ok_or_else(|| format!("Uso: `{}volume <0-100>`", prefix)),
        },
        "queue" | "q" => match args.first() {
            None => Ok(Command::Queue(1)),
            Some(arg) => number(arg)
                .map(|page| Command::Queue(page.max(1) as usize))
                .ok_or_else(|| format!("Uso: `{}queue [página]`", prefix)),
        },
        "remove" | "rm" => args
            .first()
            .and_then(|arg| number(arg))
            .map(|position| Command::Remove(position as usize))
            .ok_or_else(|| format!("Uso: `{}remove <posición>`", prefix)),
        "move" => match (args.first().and_then(|a| number(a)), args.get(1).and_then(|a| number(a))) {
            (Some(from), Some(to)) => Ok(Command::Move {
                from: from as usize,
                to: to as usize,
            }),
            _ => Err(format!("Uso: `{}move <desde> <hasta>`", prefix)),
        },
        "shuffle" => Ok(Command::Shuffle),
        "repeat" | "loop" => Ok(Command::Repeat),
        "clear" => Ok(Command::Clear),
        "nowplaying" | "np" => Ok(Command::NowPlaying),
        "disconnect" | "dc" | "leave" => Ok(Command::Disconnect),
        "reconnect" => Ok(Command::Reconnect),
        "status" => Ok(Command::Status),
        "help" => Ok(Command::Help),
        _ => return None,
    };

    Some(command)
}

fn number(arg: &str) -> Option<u32> {
    arg.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ok(content: &str) -> Command {
        parse(content, "!").unwrap().unwrap()
    }

    #[test]
    fn aliases_map_to_the_same_command() {
        assert_eq!(ok("!p lofi hip hop"), Command::Play("lofi hip hop".into()));
        assert_eq!(ok("!play   lofi   hip hop "), Command::Play("lofi hip hop".into()));
        assert_eq!(ok("!s"), Command::Skip);
        assert_eq!(ok("!loop"), Command::Repeat);
        assert_eq!(ok("!np"), Command::NowPlaying);
        assert_eq!(ok("!leave"), Command::Disconnect);
        assert_eq!(ok("!dc"), Command::Disconnect);
        assert_eq!(ok("!RM 3"), Command::Remove(3));
    }

    #[test]
    fn arguments_are_validated() {
        assert!(parse("!play", "!").unwrap().is_err());
        assert!(parse("!remove dos", "!").unwrap().is_err());
        assert!(parse("!move 1", "!").unwrap().is_err());
        assert!(parse("!volume alto", "!").unwrap().is_err());

        assert_eq!(ok("!vol"), Command::Volume(None));
        assert_eq!(ok("!volume 150"), Command::Volume(Some(150)));
        assert_eq!(ok("!q"), Command::Queue(1));
        assert_eq!(ok("!queue 0"), Command::Queue(1));
        assert_eq!(ok("!move 4 1"), Command::Move { from: 4, to: 1 });
    }

    #[test]
    fn foreign_messages_are_ignored() {
        assert_eq!(parse("hola", "!"), None);
        assert_eq!(parse("!", "!"), None);
        assert_eq!(parse("!desconocido", "!"), None);
        assert_eq!(parse("?play algo", "!"), None);
        assert_eq!(
            parse("$$skip", "$$").unwrap().unwrap(),
            Command::Skip
        );
    }
}
