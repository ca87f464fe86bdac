//! ビルドコンテキスト転送用のバイトパイプ
//!
//! 書き込み側は同期の [`std::io::Write`]（ブロッキングスレッドで tar を書く）、
//! 読み出し側は [`tokio::io::AsyncRead`]（リモートコマンドの stdin）です。
//! 正常終了は [`PipeWriter::close`] を明示的に呼んだ場合のみで、
//! エラー終了やクローズせずに破棄した場合は読み出し側にエラーが届きます。

use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use std::io;
use tokio::sync::mpsc;
use tokio_util::io::StreamReader;

/// パイプに溜められるチャンク数
const PIPE_CAPACITY: usize = 16;

enum Frame {
    Data(Bytes),
    Eof,
    Failed(io::Error),
}

/// パイプの書き込み側
pub struct PipeWriter {
    tx: Option<mpsc::Sender<Frame>>,
}

/// パイプの読み出し側
pub type PipeReader = StreamReader<BoxStream<'static, io::Result<Bytes>>, Bytes>;

/// 単一の書き込み側と読み出し側を持つパイプを作成
pub fn pipe() -> (PipeWriter, PipeReader) {
    let (tx, rx) = mpsc::channel(PIPE_CAPACITY);

    let stream = futures_util::stream::unfold(Some(rx), |rx| async move {
        let mut rx = rx?;
        match rx.recv().await {
            Some(Frame::Data(chunk)) => Some((Ok(chunk), Some(rx))),
            Some(Frame::Eof) => None,
            Some(Frame::Failed(err)) => Some((Err(err), None)),
            None => Some((
                Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "archive producer exited without closing the pipe",
                )),
                None,
            )),
        }
    })
    .boxed();

    (PipeWriter { tx: Some(tx) }, StreamReader::new(stream))
}

impl PipeWriter {
    /// 正常終了（読み出し側は EOF を受け取る）
    pub fn close(mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.blocking_send(Frame::Eof);
        }
    }

    /// エラー終了（読み出し側は `err` を受け取る）
    pub fn close_with_error(mut self, err: io::Error) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.blocking_send(Frame::Failed(err));
        }
    }
}

impl io::Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "pipe already closed"))?;

        tx.blocking_send(Frame::Data(Bytes::copy_from_slice(buf)))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader went away"))?;

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
