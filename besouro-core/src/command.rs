//! デバッガコマンド

/// レジスタ操作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterCommand {
    /// 全レジスタを表示
    Dump,
    /// レジスタを読む
    Read(String),
    /// レジスタに書き込む（レジスタ名、値）
    Write(String, String),
}

/// メモリ操作（1ワード単位）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryCommand {
    /// アドレスから読む
    Read(String),
    /// アドレスに書き込む（アドレス、値）
    Write(String, String),
}

/// シンボル情報の問い合わせ
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InfoCommand {
    /// アドレス（省略時はPC）を含む関数
    Function(Option<String>),
    /// アドレス（省略時はPC）の行
    Line(Option<String>),
    /// ブレークポイント一覧
    Breakpoints,
}

/// デバッガコマンド
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// ブレークポイントを設定（アドレスまたはシンボル名）
    Break(String),
    /// 実行継続
    Continue,
    /// 1命令のステップ実行
    StepInstruction,
    /// レジスタ操作
    Register(RegisterCommand),
    /// メモリ操作
    Memory(MemoryCommand),
    /// シンボル情報
    Info(InfoCommand),
    /// ヘルプ表示
    Help,
    /// 終了
    Quit,
}

/// コマンド入力のエラー
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("Unknown command: {0}")]
    Unknown(String),

    #[error("'{command}' expects {expected} argument(s), got {got}")]
    WrongArity {
        command: &'static str,
        expected: &'static str,
        got: usize,
    },

    #[error("'{command}' expects one of: {options}")]
    MissingSubcommand {
        command: &'static str,
        options: &'static str,
    },
}

/// 引数の数を検査する
fn expect_args(
    command: &'static str,
    args: &[&str],
    expected: std::ops::RangeInclusive<usize>,
    description: &'static str,
) -> Result<(), CommandError> {
    if expected.contains(&args.len()) {
        Ok(())
    } else {
        Err(CommandError::WrongArity {
            command,
            expected: description,
            got: args.len(),
        })
    }
}

impl Command {
    /// コマンド文字列をパースする
    ///
    /// 空行の場合は `Ok(None)` を返します。
    pub fn parse(input: &str) -> Result<Option<Self>, CommandError> {
        let parts: Vec<&str> = input.split_whitespace().collect();
        let (name, args) = match parts.split_first() {
            Some((name, args)) => (*name, args),
            None => return Ok(None),
        };

        let command = match name {
            "break" | "breakpoint" | "b" => {
                expect_args("break", args, 1..=1, "1")?;
                Command::Break(args[0].to_string())
            }
            "continue" | "c" => {
                expect_args("continue", args, 0..=0, "0")?;
                Command::Continue
            }
            "stepi" | "si" => {
                expect_args("stepi", args, 0..=0, "0")?;
                Command::StepInstruction
            }
            "register" | "reg" => Command::Register(Self::parse_register(args)?),
            "memory" | "mem" => Command::Memory(Self::parse_memory(args)?),
            "info" | "i" => Command::Info(Self::parse_info(args)?),
            "help" | "h" | "?" => Command::Help,
            "quit" | "q" | "exit" => {
                expect_args("quit", args, 0..=0, "0")?;
                Command::Quit
            }
            _ => return Err(CommandError::Unknown(name.to_string())),
        };

        Ok(Some(command))
    }

    fn parse_register(args: &[&str]) -> Result<RegisterCommand, CommandError> {
        match args.split_first() {
            Some((&"dump", rest)) => {
                expect_args("register dump", rest, 0..=0, "0")?;
                Ok(RegisterCommand::Dump)
            }
            Some((&"read", rest)) => {
                expect_args("register read", rest, 1..=1, "1")?;
                Ok(RegisterCommand::Read(rest[0].to_string()))
            }
            Some((&"write", rest)) => {
                expect_args("register write", rest, 2..=2, "2")?;
                Ok(RegisterCommand::Write(rest[0].to_string(), rest[1].to_string()))
            }
            _ => Err(CommandError::MissingSubcommand {
                command: "register",
                options: "dump, read, write",
            }),
        }
    }

    fn parse_memory(args: &[&str]) -> Result<MemoryCommand, CommandError> {
        match args.split_first() {
            Some((&"read", rest)) => {
                expect_args("memory read", rest, 1..=1, "1")?;
                Ok(MemoryCommand::Read(rest[0].to_string()))
            }
            Some((&"write", rest)) => {
                expect_args("memory write", rest, 2..=2, "2")?;
                Ok(MemoryCommand::Write(rest[0].to_string(), rest[1].to_string()))
            }
            _ => Err(CommandError::MissingSubcommand {
                command: "memory",
                options: "read, write",
            }),
        }
    }

    fn parse_info(args: &[&str]) -> Result<InfoCommand, CommandError> {
        match args.split_first() {
            Some((&("function" | "func" | "f"), rest)) => {
                expect_args("info function", rest, 0..=1, "0 or 1")?;
                Ok(InfoCommand::Function(rest.first().map(|s| s.to_string())))
            }
            Some((&("line" | "l"), rest)) => {
                expect_args("info line", rest, 0..=1, "0 or 1")?;
                Ok(InfoCommand::Line(rest.first().map(|s| s.to_string())))
            }
            Some((&("breakpoints" | "break" | "b"), rest)) => {
                expect_args("info breakpoints", rest, 0..=0, "0")?;
                Ok(InfoCommand::Breakpoints)
            }
            _ => Err(CommandError::MissingSubcommand {
                command: "info",
                options: "function, line, breakpoints",
            }),
        }
    }
}
