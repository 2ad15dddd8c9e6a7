use std::fmt;

/// One line of a build descriptor (Dockerfile)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    From { image: String, alias: Option<String> },
    Workdir(String),
    /// (files, destination, optional source stage)
    Copy {
        sources: Vec<String>,
        dest: String,
        from: Option<String>,
    },
    Run(String),
    Env(String, String),
    User(String),
    /// Exec-form entrypoint
    Entrypoint(Vec<String>),
}

impl Instruction {
    pub fn from_image(image: &str) -> Self {
        Instruction::From {
            image: image.to_string(),
            alias: None,
        }
    }

    pub fn copy(sources: &[&str], dest: &str) -> Self {
        Instruction::Copy {
            sources: sources.iter().map(|s| s.to_string()).collect(),
            dest: dest.to_string(),
            from: None,
        }
    }
}

fn exec_form(args: &[String]) -> String {
    // JSON string escaping is what Dockerfile exec form expects
    serde_json::to_string(args).unwrap_or_else(|_| "[]".to_string())
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::From { image, alias } => match alias {
                Some(alias) => write!(f, "FROM {} AS {}", image, alias),
                None => write!(f, "FROM {}", image),
            },
            Instruction::Workdir(dir) => write!(f, "WORKDIR {}", dir),
            Instruction::Copy {
                sources,
                dest,
                from,
            } => {
                f.write_str("COPY ")?;
                if let Some(stage) = from {
                    write!(f, "--from={} ", stage)?;
                }
                write!(f, "{} {}", sources.join(" "), dest)
            }
            Instruction::Run(cmd) => write!(f, "RUN {}", cmd),
            Instruction::Env(key, value) => write!(f, "ENV {}={}", key, value),
            Instruction::User(user) => write!(f, "USER {}", user),
            Instruction::Entrypoint(args) => write!(f, "ENTRYPOINT {}", exec_form(args)),
        }
    }
}

/// Render a full descriptor, one instruction per line
pub fn render(instructions: &[Instruction]) -> String {
    let mut out = String::new();
    for instr in instructions {
        out.push_str(&instr.to_string());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_multi_stage() {
        let instructions = vec![
            Instruction::From {
                image: "golang:1.22-alpine".into(),
                alias: Some("build".into()),
            },
            Instruction::Workdir("/src".into()),
            Instruction::copy(&["go.mod", "solution.go", "harness.go"], "./"),
            Instruction::Run("CGO_ENABLED=0 go build -o /out/solution .".into()),
            Instruction::from_image("alpine:3.20"),
            Instruction::Copy {
                sources: vec!["/out/solution".into()],
                dest: "/app/solution".into(),
                from: Some("build".into()),
            },
            Instruction::User("1000".into()),
            Instruction::Entrypoint(vec!["/app/solution".into()]),
        ];

        let rendered = render(&instructions);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 8);
        assert_eq!(lines[0], "FROM golang:1.22-alpine AS build");
        assert_eq!(lines[2], "COPY go.mod solution.go harness.go ./");
        assert_eq!(lines[5], "COPY --from=build /out/solution /app/solution");
        assert_eq!(lines[7], r#"ENTRYPOINT ["/app/solution"]"#);
    }

    #[test]
    fn test_entrypoint_escapes_arguments() {
        let instr = Instruction::Entrypoint(vec!["python3".into(), "say \"hi\"".into()]);
        assert_eq!(instr.to_string(), r#"ENTRYPOINT ["python3","say \"hi\""]"#);
    }
}
