//! Progressive console log reads.
//!
//! Jenkins serves console output through `logText/progressiveText?start=N`.
//! The response holds the bytes from `N` on, `X-Text-Size` carries the offset
//! to resume from and `X-More-Data: true` says the build may still append.
//! Reads are keyed purely by offset, so any read can be retried or resumed by
//! another caller.

use std::time::Duration;

use futures::{Stream, stream};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::{
    BridgeConfig, JenkinsClient, JenkinsError,
    types::{BuildRef, LogChunk},
};

const TEXT_SIZE_HEADER: &str = "X-Text-Size";
const MORE_DATA_HEADER: &str = "X-More-Data";

/// One progressive-text response, after the byte limit was applied.
#[derive(Debug)]
struct ProgressiveRead {
    chunk: LogChunk,
    /// Log size reported by Jenkins for this response.
    size: u64,
}

impl ProgressiveRead {
    fn truncated(&self) -> bool {
        self.chunk.end < self.size
    }
}

/// Reads console output in bounded, offset-addressed chunks.
#[derive(Debug, Clone)]
pub struct LogReader {
    client: JenkinsClient,
    chunk_limit: usize,
    poll_interval: Duration,
}

impl LogReader {
    pub fn new(client: JenkinsClient, config: &BridgeConfig) -> Self {
        Self {
            client,
            chunk_limit: config.log_chunk_limit,
            poll_interval: config.log_poll_interval(),
        }
    }

    /// Largest number of bytes a single chunk may hold.
    pub fn chunk_limit(&self) -> usize {
        self.chunk_limit
    }

    /// Reads from `offset` up to the configured chunk limit.
    ///
    /// Never waits for output: a running build with nothing new yields an
    /// empty chunk with `more` set.
    ///
    /// # Errors
    ///
    /// Returns [`JenkinsError::NotFound`] for unknown builds,
    /// [`JenkinsError::OffsetOutOfRange`] for offsets past the end of the log,
    /// or any client error.
    pub async fn read_from(&self, build: &BuildRef, offset: u64) -> Result<LogChunk, JenkinsError> {
        self.read_bounded(build, offset, self.chunk_limit).await
    }

    /// Like [`Self::read_from`] with a caller-chosen limit, itself capped by
    /// the configured chunk limit.
    ///
    /// # Errors
    ///
    /// See [`Self::read_from`].
    pub async fn read_bounded(
        &self,
        build: &BuildRef,
        offset: u64,
        limit: usize,
    ) -> Result<LogChunk, JenkinsError> {
        Ok(self.read(build, offset, limit).await?.chunk)
    }

    #[instrument(skip(self, build), fields(build = %build))]
    async fn read(
        &self,
        build: &BuildRef,
        offset: u64,
        limit: usize,
    ) -> Result<ProgressiveRead, JenkinsError> {
        let limit = limit.clamp(1, self.chunk_limit);
        let url = self
            .client
            .build_url(build, &["logText", "progressiveText"]);
        let response = self
            .client
            .get(&url, &[("start", offset.to_string())])
            .await
            .map_err(|err| match err {
                JenkinsError::NotFound(_) => JenkinsError::NotFound(format!("build {build}")),
                other => other,
            })?;

        let body = response.body.as_slice();
        let size = match response.header(TEXT_SIZE_HEADER) {
            Some(raw) => raw.trim().parse::<u64>().map_err(|e| {
                JenkinsError::Decode(format!("{TEXT_SIZE_HEADER} '{raw}': {e}"))
            })?,
            None => offset + body.len() as u64,
        };
        // Jenkins restarts from zero when asked for an offset past the end.
        if size < offset {
            return Err(JenkinsError::OffsetOutOfRange { offset, size });
        }
        let more_data = response
            .header(MORE_DATA_HEADER)
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"));

        let cut = if body.len() > limit {
            utf8_cut(body, limit)
        } else {
            body.len()
        };
        let bytes = &body[..cut];
        let truncated = cut < body.len();
        let end = if truncated {
            offset + bytes.len() as u64
        } else {
            size
        };
        debug!(offset, end, size, more_data, "Read console log");

        Ok(ProgressiveRead {
            chunk: LogChunk {
                start: offset,
                end,
                text: String::from_utf8_lossy(bytes).into_owned(),
                more: more_data || truncated,
            },
            size,
        })
    }

    /// Lazily reads chunks from `offset` until a chunk reports `more == false`.
    ///
    /// The stream itself never sleeps; a running build with no new output
    /// yields empty chunks, so consumers pace their own polling.
    pub fn stream(
        &self,
        build: BuildRef,
        offset: u64,
    ) -> impl Stream<Item = Result<LogChunk, JenkinsError>> + '_ {
        stream::unfold(Some(LogCursor::new(build, offset)), move |cursor| async move {
            let mut cursor = cursor?;
            match self.read_from(&cursor.build, cursor.offset).await {
                Ok(chunk) => {
                    cursor.offset = chunk.next_offset();
                    let next = chunk.more.then_some(cursor);
                    Some((Ok(chunk), next))
                }
                Err(err) => Some((Err(err), None)),
            }
        })
    }

    /// Collects output from `offset` for up to `window`, pausing between
    /// empty reads, and returns it as one chunk.
    ///
    /// Stops early once the build stops appending or `limit` bytes were
    /// collected. A read still in flight when the window closes is dropped
    /// and the output collected so far is returned.
    ///
    /// # Errors
    ///
    /// See [`Self::read_from`]; additionally [`JenkinsError::Cancelled`] when
    /// `cancel` fires.
    #[instrument(skip(self, build, cancel), fields(build = %build))]
    pub async fn follow(
        &self,
        build: &BuildRef,
        offset: u64,
        limit: usize,
        window: Duration,
        cancel: &CancellationToken,
    ) -> Result<LogChunk, JenkinsError> {
        let limit = limit.clamp(1, self.chunk_limit);
        let deadline = Instant::now() + window;
        let mut collected = LogChunk {
            start: offset,
            end: offset,
            text: String::new(),
            more: true,
        };

        loop {
            let taken = usize::try_from(collected.end - collected.start).unwrap_or(usize::MAX);
            let remaining = limit.saturating_sub(taken);
            if remaining == 0 {
                collected.more = true;
                break;
            }
            let read = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(JenkinsError::Cancelled),
                () = tokio::time::sleep_until(deadline) => break,
                read = self.read(build, collected.end, remaining) => read?,
            };

            let got_bytes = !read.chunk.is_empty();
            collected.text.push_str(&read.chunk.text);
            collected.end = read.chunk.end;
            collected.more = read.chunk.more;
            if !collected.more || read.truncated() {
                break;
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            if !got_bytes {
                let pause = self.poll_interval.min(deadline - now);
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(JenkinsError::Cancelled),
                    () = tokio::time::sleep(pause) => {}
                }
            }
        }
        Ok(collected)
    }
}

/// Position of a [`LogReader::stream`] in one build's console log.
#[derive(Debug)]
struct LogCursor {
    build: BuildRef,
    offset: u64,
}

impl LogCursor {
    fn new(build: BuildRef, offset: u64) -> Self {
        Self { build, offset }
    }
}

/// Largest cut `<= limit` that does not split a UTF-8 sequence.
///
/// When even the first character is wider than `limit`, the cut moves forward
/// to that character's end instead, so a chunk never ends mid-character.
fn utf8_cut(bytes: &[u8], limit: usize) -> usize {
    let is_continuation = |i: usize| bytes.get(i).is_some_and(|b| b & 0xC0 == 0x80);
    let mut cut = limit.min(bytes.len());
    while cut > 0 && is_continuation(cut) {
        cut -= 1;
    }
    if cut > 0 {
        return cut;
    }
    cut = limit.min(bytes.len());
    while is_continuation(cut) {
        cut += 1;
    }
    cut
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path, query_param},
    };

    use super::*;
    use crate::{
        client::tests::{test_client, test_config},
        types::{BuildSelector, JobRef},
    };

    const LOG_PATH: &str = "/job/demo/17/logText/progressiveText";

    fn reader(server: &MockServer) -> LogReader {
        LogReader::new(test_client(server), &test_config(&server.uri()))
    }

    fn build() -> BuildRef {
        BuildRef::new(JobRef::parse("demo").unwrap(), BuildSelector::Number(17))
    }

    fn progressive(body: &str, size: u64, more: bool) -> ResponseTemplate {
        let mut template = ResponseTemplate::new(200)
            .insert_header("X-Text-Size", size.to_string())
            .set_body_string(body);
        if more {
            template = template.insert_header("X-More-Data", "true");
        }
        template
    }

    async fn mount_at(server: &MockServer, start: &str, response: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path(LOG_PATH))
            .and(query_param("start", start))
            .respond_with(response)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_repeated_reads_reconstruct_full_log() {
        let server = MockServer::start().await;
        mount_at(&server, "0", progressive("Started by user\n", 16, true)).await;
        mount_at(&server, "16", progressive("", 16, true)).await;

        let reader = reader(&server);
        let first = reader.read_from(&build(), 0).await.unwrap();
        assert_eq!(first.text, "Started by user\n");
        assert_eq!(first.next_offset(), 16);
        assert!(first.more);

        // Running build with no new output: empty chunk, still more.
        let idle = reader.read_from(&build(), 16).await.unwrap();
        assert!(idle.is_empty());
        assert!(idle.more);

        server.reset().await;
        mount_at(&server, "16", progressive("Finished: SUCCESS\n", 34, false)).await;

        let last = reader.read_from(&build(), 16).await.unwrap();
        assert_eq!(last.start, 16);
        assert_eq!(last.end, 34);
        assert!(!last.more);
        assert_eq!(
            format!("{}{}", first.text, last.text),
            "Started by user\nFinished: SUCCESS\n"
        );
    }

    #[tokio::test]
    async fn test_chunk_is_capped_and_marked_incomplete() {
        let server = MockServer::start().await;
        let body = "a".repeat(3000);
        mount_at(&server, "0", progressive(&body, 3000, false)).await;

        let reader = reader(&server);
        let chunk = reader.read_bounded(&build(), 0, 1024).await.unwrap();
        assert_eq!(chunk.end, 1024);
        assert_eq!(chunk.text.len(), 1024);
        assert!(chunk.more, "a truncated chunk must ask for another read");
    }

    #[tokio::test]
    async fn test_chunk_cut_respects_utf8_boundaries() {
        let server = MockServer::start().await;
        let body = "é".repeat(1000);
        mount_at(&server, "0", progressive(&body, 2000, false)).await;

        let reader = reader(&server);
        let chunk = reader.read_bounded(&build(), 0, 1025).await.unwrap();
        assert_eq!(chunk.end, 1024);
        assert_eq!(chunk.text, "é".repeat(512));
    }

    #[tokio::test]
    async fn test_offset_past_end_is_rejected() {
        let server = MockServer::start().await;
        mount_at(&server, "500", progressive("whole log again", 100, false)).await;

        let err = reader(&server).read_from(&build(), 500).await.unwrap_err();
        assert!(matches!(
            err,
            JenkinsError::OffsetOutOfRange {
                offset: 500,
                size: 100
            }
        ));
    }

    #[tokio::test]
    async fn test_unknown_build_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/job/demo/999/logText/progressiveText"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let missing = BuildRef::new(JobRef::parse("demo").unwrap(), BuildSelector::Number(999));
        let err = reader(&server).read_from(&missing, 0).await.unwrap_err();
        assert_eq!(err.to_string(), "not found: build demo #999");
    }

    #[tokio::test]
    async fn test_stream_ends_after_final_chunk() {
        let server = MockServer::start().await;
        mount_at(&server, "0", progressive("one\n", 4, true)).await;
        mount_at(&server, "4", progressive("two\n", 8, false)).await;

        let reader = reader(&server);
        let chunks: Vec<_> = reader
            .stream(build(), 0)
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;

        assert_eq!(chunks.len(), 2);
        let text: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(text, "one\ntwo\n");
        assert!(!chunks[1].more);
    }

    #[tokio::test]
    async fn test_follow_waits_for_output_until_build_finishes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(LOG_PATH))
            .and(query_param("start", "0"))
            .respond_with(progressive("", 0, true))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        mount_at(&server, "0", progressive("building\n", 9, true)).await;
        mount_at(&server, "9", progressive("done\n", 14, false)).await;

        let chunk = reader(&server)
            .follow(
                &build(),
                0,
                usize::MAX,
                Duration::from_secs(5),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(chunk.start, 0);
        assert_eq!(chunk.end, 14);
        assert_eq!(chunk.text, "building\ndone\n");
        assert!(!chunk.more);
    }

    #[tokio::test]
    async fn test_follow_returns_partial_output_when_window_closes() {
        let server = MockServer::start().await;
        mount_at(&server, "0", progressive("step 1\n", 7, true)).await;
        mount_at(&server, "7", progressive("", 7, true)).await;

        let chunk = reader(&server)
            .follow(
                &build(),
                0,
                usize::MAX,
                Duration::from_millis(40),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(chunk.text, "step 1\n");
        assert_eq!(chunk.next_offset(), 7);
        assert!(chunk.more);
    }

    #[tokio::test]
    async fn test_follow_honours_cancellation() {
        let server = MockServer::start().await;
        mount_at(&server, "0", progressive("", 0, true)).await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = reader(&server)
            .follow(&build(), 0, 1024, Duration::from_secs(30), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, JenkinsError::Cancelled));
    }

    #[test]
    fn test_utf8_cut() {
        let text = "aé".as_bytes();
        assert_eq!(utf8_cut(text, 2), 1);
        assert_eq!(utf8_cut(text, 3), 3);
        assert_eq!(utf8_cut(b"abc", 10), 3);
        // A limit narrower than the first character takes the whole character.
        assert_eq!(utf8_cut("é\n".as_bytes(), 1), 2);
        assert_eq!(utf8_cut("€x".as_bytes(), 2), 3);
    }

    #[tokio::test]
    async fn test_tiny_limit_reads_reconstruct_multibyte_log() {
        let server = MockServer::start().await;
        let log = "é\n";
        mount_at(&server, "0", progressive(log, 3, false)).await;
        mount_at(&server, "2", progressive("\n", 3, false)).await;

        let reader = reader(&server);
        let mut text = String::new();
        let mut offset = 0;
        loop {
            let chunk = reader.read_bounded(&build(), offset, 1).await.unwrap();
            text.push_str(&chunk.text);
            offset = chunk.next_offset();
            if !chunk.more {
                break;
            }
        }
        assert_eq!(text, log);
        assert_eq!(offset, 3);
    }

    #[tokio::test]
    async fn test_follow_abandons_slow_read_when_window_closes() {
        let server = MockServer::start().await;
        mount_at(
            &server,
            "0",
            progressive("late\n", 5, true).set_delay(Duration::from_secs(3)),
        )
        .await;

        let started = Instant::now();
        let chunk = reader(&server)
            .follow(
                &build(),
                0,
                1024,
                Duration::from_millis(200),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(chunk.is_empty());
        assert_eq!(chunk.next_offset(), 0);
        assert!(chunk.more);
    }
}
