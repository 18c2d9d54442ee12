//! Interactive single-account prompt.

use async_trait::async_trait;
use secrecy::SecretString;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout,
};
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::domain::{Account, AccountSource, AccountSourceError, FlowFlags};

/// Asks for init data, install UUID and the three flow flags
pub struct PromptAccountSource<R, W> {
    io: Mutex<(R, W)>,
}

impl PromptAccountSource<BufReader<Stdin>, Stdout> {
    /// Prompt on the process terminal
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

impl<R, W> PromptAccountSource<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            io: Mutex::new((reader, writer)),
        }
    }
}

async fn ask<R, W>(
    reader: &mut R,
    writer: &mut W,
    question: &str,
) -> Result<String, AccountSourceError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let io_err = |e: std::io::Error| AccountSourceError::Prompt(e.to_string());

    writer.write_all(question.as_bytes()).await.map_err(io_err)?;
    writer.flush().await.map_err(io_err)?;

    let mut line = String::new();
    let read = reader.read_line(&mut line).await.map_err(io_err)?;
    if read == 0 {
        return Err(AccountSourceError::Prompt(format!(
            "input closed while asking: {}",
            question.trim()
        )));
    }
    Ok(line.trim().to_string())
}

/// Only an explicit yes enables a flow
pub fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

#[async_trait]
impl<R, W> AccountSource for PromptAccountSource<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn load(&self) -> Result<Vec<Account>, AccountSourceError> {
        let mut guard = self.io.lock().await;
        let (reader, writer) = &mut *guard;

        let init_data = ask(reader, writer, "Enter init data: ").await?;
        if init_data.is_empty() {
            return Err(AccountSourceError::Prompt("init data is required".to_string()));
        }

        let install_uuid = match ask(reader, writer, "Enter install UUID: ").await? {
            uuid if uuid.is_empty() => {
                let generated = Uuid::new_v4().to_string();
                info!(install_uuid = %generated, "No install UUID given, generated one");
                generated
            }
            uuid => uuid,
        };

        let flags = FlowFlags {
            mining: is_yes(&ask(reader, writer, "Claim mining event? (y/n): ").await?),
            daily: is_yes(&ask(reader, writer, "Claim daily reward? (y/n): ").await?),
            upgrade: is_yes(&ask(reader, writer, "Perform upgrade? (y/n): ").await?),
        };

        Ok(vec![Account::from_init_data(
            SecretString::from(init_data),
            install_uuid,
            flags,
        )])
    }

    fn name(&self) -> &'static str {
        "prompt"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn source(input: &'static str) -> PromptAccountSource<&'static [u8], Vec<u8>> {
        PromptAccountSource::new(input.as_bytes(), Vec::new())
    }

    #[test]
    fn test_is_yes() {
        assert!(is_yes("y"));
        assert!(is_yes(" YES "));
        assert!(!is_yes("n"));
        assert!(!is_yes(""));
        assert!(!is_yes("yep"));
    }

    #[tokio::test]
    async fn test_prompt_reads_all_answers() {
        let accounts = source("query_id=abc\nuuid-1\ny\nN\nyes\n").load().await.unwrap();
        assert_eq!(accounts.len(), 1);
        let account = &accounts[0];
        // Init data keeps its case
        assert_eq!(account.init_data.as_ref().unwrap().expose_secret(), "query_id=abc");
        assert_eq!(account.install_uuid, "uuid-1");
        assert_eq!(
            account.flags,
            FlowFlags {
                mining: true,
                daily: false,
                upgrade: true
            }
        );
        assert!(account.token.is_none());
    }

    #[tokio::test]
    async fn test_blank_uuid_is_generated() {
        let accounts = source("data\n\nn\nn\nn\n").load().await.unwrap();
        assert!(Uuid::parse_str(&accounts[0].install_uuid).is_ok());
    }

    #[tokio::test]
    async fn test_closed_input_is_prompt_error() {
        assert!(matches!(
            source("data\nuuid\n").load().await,
            Err(AccountSourceError::Prompt(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_init_data_rejected() {
        assert!(matches!(
            source("\n").load().await,
            Err(AccountSourceError::Prompt(_))
        ));
    }
}
