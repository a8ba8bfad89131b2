//! Line commands read from stdin.
//!
//! ```text
//! line 0 0 100 100        rect 10 10 50 40       ellipse 0 0 30 30
//! free 0 0 5 8 9 12       color 255 0 0 255      width 3
//! undo   redo   clear   show   sync   quit
//! ```

use paint_core::{CommandKind, Point};

/// One parsed stdin line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Shape { kind: CommandKind, points: Vec<Point> },
    Color([u8; 4]),
    Width(u16),
    Undo,
    Redo,
    Clear,
    Show,
    Sync,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    Empty,
    UnknownCommand(String),
    BadNumber(String),
    WrongArgs { command: &'static str, expected: &'static str },
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "Empty line"),
            Self::UnknownCommand(c) => write!(f, "Unknown command: {c}"),
            Self::BadNumber(n) => write!(f, "Not a number: {n}"),
            Self::WrongArgs { command, expected } => write!(f, "{command} expects {expected}"),
        }
    }
}

impl std::error::Error for ParseError {}

pub fn parse(line: &str) -> Result<Input, ParseError> {
    let mut words = line.split_whitespace();
    let command = words.next().ok_or(ParseError::Empty)?;
    let args: Vec<&str> = words.collect();

    let input = match command {
        "line" => shape(CommandKind::Line, "line", &args)?,
        "rect" => shape(CommandKind::Rectangle, "rect", &args)?,
        "ellipse" => shape(CommandKind::Ellipse, "ellipse", &args)?,
        "free" => {
            let values = numbers::<i32>(&args)?;
            if values.is_empty() || values.len() % 2 != 0 {
                return Err(ParseError::WrongArgs {
                    command: "free",
                    expected: "one or more X Y pairs",
                });
            }
            Input::Shape {
                kind: CommandKind::Freehand,
                points: values.chunks(2).map(|xy| Point::new(xy[0], xy[1])).collect(),
            }
        }
        "color" => match numbers::<u8>(&args)?[..] {
            [r, g, b, a] => Input::Color([r, g, b, a]),
            _ => {
                return Err(ParseError::WrongArgs {
                    command: "color",
                    expected: "R G B A",
                })
            }
        },
        "width" => match numbers::<u16>(&args)?[..] {
            [w] => Input::Width(w),
            _ => {
                return Err(ParseError::WrongArgs {
                    command: "width",
                    expected: "W",
                })
            }
        },
        "undo" => Input::Undo,
        "redo" => Input::Redo,
        "clear" => Input::Clear,
        "show" => Input::Show,
        "sync" => Input::Sync,
        "quit" | "exit" => Input::Quit,
        other => return Err(ParseError::UnknownCommand(other.to_string())),
    };
    Ok(input)
}

fn shape(kind: CommandKind, command: &'static str, args: &[&str]) -> Result<Input, ParseError> {
    match numbers::<i32>(args)?[..] {
        [x1, y1, x2, y2] => Ok(Input::Shape {
            kind,
            points: vec![Point::new(x1, y1), Point::new(x2, y2)],
        }),
        _ => Err(ParseError::WrongArgs {
            command,
            expected: "X1 Y1 X2 Y2",
        }),
    }
}

fn numbers<T: std::str::FromStr>(args: &[&str]) -> Result<Vec<T>, ParseError> {
    args.iter()
        .map(|a| a.parse().map_err(|_| ParseError::BadNumber(a.to_string())))
        .collect()
}
