//! # Frame Codec
//!
//! Tokio codec for one direction of one leg.
//!
//! ## Wire Format
//! ```text
//! plain:       [Length varint] [PacketId varint] [Payload]
//! compressed:  [Length varint] [DataLength varint] [zlib(PacketId + Payload) | PacketId + Payload]
//! ```
//! `DataLength` is zero when the body is sent uncompressed. When a cipher is
//! installed, every byte on the stream (length prefixes included) passes
//! through AES-128/CFB8.
//!
//! When the secret is only known as a set of candidates, a [`KeyTrial`]
//! installs the one under which the next frame decodes to an accepted
//! packet.
//!
//! Compression threshold and cipher are swapped in while the stream is
//! open. Reader and writer each own a codec instance, and both live behind
//! the leg's locks, so a swap never overlaps a read or write on the same
//! stream.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::config::MAX_PACKET_SIZE;
use crate::core::packet::Packet;
use crate::core::types::{peek_varint, varint_len, WireRead, WireWrite};
use crate::error::{ProtocolError, Result};
use crate::utils::compression;
use crate::utils::crypto::{SharedSecret, StreamDecryptor, StreamEncryptor};

/// Candidate secrets for an incoming stream whose cipher is not known yet.
#[derive(Debug)]
pub struct KeyTrial {
    pub candidates: Vec<SharedSecret>,
    /// Packet ids the first encrypted frame may carry.
    pub first_ids: &'static [i32],
    /// Final check on a fully decoded first frame.
    pub accept: fn(&Packet) -> bool,
}

/// A candidate still in the running, with the stream decrypted so far.
#[derive(Debug)]
struct TrialKey {
    secret: SharedSecret,
    decryptor: StreamDecryptor,
    plain: BytesMut,
}

#[derive(Debug)]
struct ActiveTrial {
    keys: Vec<TrialKey>,
    first_ids: &'static [i32],
    accept: fn(&Packet) -> bool,
}

enum TrialOutcome {
    Accepted,
    Pending,
    Rejected,
}

#[derive(Debug)]
pub struct FrameCodec {
    max_frame: usize,
    threshold: Option<usize>,
    encryptor: Option<StreamEncryptor>,
    decryptor: Option<StreamDecryptor>,
    /// Bytes at the front of the read buffer that are already plaintext.
    decrypted: usize,
    trial: Option<ActiveTrial>,
    selected: Option<SharedSecret>,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(MAX_PACKET_SIZE)
    }
}

impl FrameCodec {
    pub fn new(max_frame: usize) -> Self {
        Self {
            max_frame,
            threshold: None,
            encryptor: None,
            decryptor: None,
            decrypted: 0,
            trial: None,
            selected: None,
        }
    }

    /// Current compression threshold, `None` while compression is off.
    pub fn threshold(&self) -> Option<usize> {
        self.threshold
    }

    pub fn set_threshold(&mut self, threshold: Option<usize>) {
        self.threshold = threshold;
    }

    pub fn is_encrypting(&self) -> bool {
        self.encryptor.is_some()
    }

    pub fn is_decrypting(&self) -> bool {
        self.decryptor.is_some()
    }

    /// Encrypt everything encoded from now on.
    ///
    /// # Errors
    /// `ProtocolError::CipherAlreadyInstalled` on a second call
    pub fn enable_encryption(&mut self, secret: &SharedSecret) -> Result<()> {
        if self.encryptor.is_some() {
            return Err(ProtocolError::CipherAlreadyInstalled);
        }
        self.encryptor = Some(StreamEncryptor::new(secret)?);
        Ok(())
    }

    /// Decrypt every byte not yet decoded, including bytes already buffered.
    ///
    /// # Errors
    /// `ProtocolError::CipherAlreadyInstalled` on a second call
    pub fn enable_decryption(&mut self, secret: &SharedSecret) -> Result<()> {
        if self.decryptor.is_some() {
            return Err(ProtocolError::CipherAlreadyInstalled);
        }
        self.decryptor = Some(StreamDecryptor::new(secret)?);
        self.decrypted = 0;
        Ok(())
    }

    /// Decrypt from the next frame on with whichever candidate makes that
    /// frame pass `trial`. Decoding fails with `DecryptionFailure` once no
    /// candidate can.
    ///
    /// # Errors
    /// `ProtocolError::CipherAlreadyInstalled` if a cipher or trial is in place
    pub fn begin_key_trial(&mut self, trial: KeyTrial) -> Result<()> {
        if self.decryptor.is_some() || self.trial.is_some() {
            return Err(ProtocolError::CipherAlreadyInstalled);
        }
        let keys = trial
            .candidates
            .into_iter()
            .map(|secret| {
                Ok(TrialKey {
                    decryptor: StreamDecryptor::new(&secret)?,
                    secret,
                    plain: BytesMut::new(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        self.trial = Some(ActiveTrial {
            keys,
            first_ids: trial.first_ids,
            accept: trial.accept,
        });
        Ok(())
    }

    /// The secret a finished key trial settled on.
    pub fn take_selected(&mut self) -> Option<SharedSecret> {
        self.selected.take()
    }

    fn judge(&self, plain: &[u8], first_ids: &[i32], accept: fn(&Packet) -> bool) -> TrialOutcome {
        let (length, header) = match peek_varint(plain) {
            Ok(Some(prefix)) => prefix,
            Ok(None) => return TrialOutcome::Pending,
            Err(_) => return TrialOutcome::Rejected,
        };
        let length = match usize::try_from(length) {
            Ok(length) if length > 0 && length <= self.max_frame => length,
            _ => return TrialOutcome::Rejected,
        };

        if plain.len() < header + length {
            // Incomplete, but the id may already rule the candidate out.
            if self.threshold.is_none() {
                match peek_varint(&plain[header..]) {
                    Ok(Some((id, _))) if !first_ids.contains(&id) => return TrialOutcome::Rejected,
                    Err(_) => return TrialOutcome::Rejected,
                    _ => {}
                }
            }
            return TrialOutcome::Pending;
        }

        let mut scratch = FrameCodec::new(self.max_frame);
        scratch.threshold = self.threshold;
        let mut frame = BytesMut::from(&plain[..header + length]);
        match scratch.decode(&mut frame) {
            Ok(Some(packet)) if accept(&packet) => TrialOutcome::Accepted,
            _ => TrialOutcome::Rejected,
        }
    }

    /// Returns whether decoding can go on: `false` while the first frame is
    /// still incomplete under some candidate.
    fn resolve_trial(&mut self, src: &mut BytesMut) -> Result<bool> {
        let Some(mut trial) = self.trial.take() else {
            return Ok(true);
        };

        let mut chosen = None;
        let mut index = 0;
        while index < trial.keys.len() {
            let key = &mut trial.keys[index];
            let seen = key.plain.len();
            if seen < src.len() {
                let mut fresh = BytesMut::from(&src[seen..]);
                key.decryptor.apply(&mut fresh);
                key.plain.extend_from_slice(&fresh);
            }
            match self.judge(&key.plain, trial.first_ids, trial.accept) {
                TrialOutcome::Accepted => {
                    chosen = Some(trial.keys.swap_remove(index));
                    break;
                }
                TrialOutcome::Pending => index += 1,
                TrialOutcome::Rejected => {
                    trial.keys.swap_remove(index);
                }
            }
        }

        match chosen {
            Some(key) => {
                src[..key.plain.len()].copy_from_slice(&key.plain);
                self.decrypted = key.plain.len();
                self.decryptor = Some(key.decryptor);
                self.selected = Some(key.secret);
                Ok(true)
            }
            None if trial.keys.is_empty() => Err(ProtocolError::DecryptionFailure),
            None => {
                self.trial = Some(trial);
                Ok(false)
            }
        }
    }

    fn decrypt_pending(&mut self, src: &mut BytesMut) {
        if let Some(decryptor) = self.decryptor.as_mut() {
            if self.decrypted < src.len() {
                decryptor.apply(&mut src[self.decrypted..]);
                self.decrypted = src.len();
            }
        }
    }

    fn consumed(&mut self, n: usize) {
        self.decrypted = self.decrypted.saturating_sub(n);
    }
}

impl Decoder for FrameCodec {
    type Item = Packet;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>> {
        if !self.resolve_trial(src)? {
            return Ok(None);
        }
        self.decrypt_pending(src);

        let Some((length, header)) = peek_varint(&src[..])? else {
            return Ok(None);
        };
        let length = usize::try_from(length).map_err(|_| ProtocolError::InvalidVarInt)?;
        if length == 0 {
            return Err(ProtocolError::MalformedPacket("empty frame".to_string()));
        }
        if length > self.max_frame {
            return Err(ProtocolError::OversizedPacket(length));
        }
        if src.len() < header + length {
            src.reserve(header + length - src.len());
            return Ok(None);
        }

        src.advance(header);
        let mut frame = src.split_to(length).freeze();
        self.consumed(header + length);

        let mut body = match self.threshold {
            None => frame,
            Some(_) => {
                let data_len = frame.read_varint()?;
                let data_len =
                    usize::try_from(data_len).map_err(|_| ProtocolError::InvalidVarInt)?;
                if data_len == 0 {
                    frame
                } else {
                    compression::decompress(&frame, data_len, self.max_frame)?.into()
                }
            }
        };

        let id = body.read_varint()?;
        trace!(id, len = body.len(), "Decoded frame");
        Ok(Some(Packet { id, payload: body }))
    }
}

impl Encoder<Packet> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<()> {
        let start = dst.len();
        let body_len = packet.body_len();

        match self.threshold {
            Some(threshold) if body_len >= threshold => {
                let mut body = BytesMut::with_capacity(body_len);
                packet.write_body(&mut body);
                let compressed = compression::compress(&body)?;
                let frame_len = varint_len(body_len as i32) + compressed.len();
                if frame_len > self.max_frame {
                    return Err(ProtocolError::OversizedPacket(frame_len));
                }
                dst.reserve(varint_len(frame_len as i32) + frame_len);
                dst.write_varint(frame_len as i32);
                dst.write_varint(body_len as i32);
                dst.extend_from_slice(&compressed);
            }
            Some(_) => {
                let frame_len = 1 + body_len;
                if frame_len > self.max_frame {
                    return Err(ProtocolError::OversizedPacket(frame_len));
                }
                dst.write_varint(frame_len as i32);
                dst.write_varint(0);
                packet.write_body(dst);
            }
            None => {
                if body_len > self.max_frame {
                    return Err(ProtocolError::OversizedPacket(body_len));
                }
                dst.write_varint(body_len as i32);
                packet.write_body(dst);
            }
        }

        if let Some(encryptor) = self.encryptor.as_mut() {
            encryptor.apply(&mut dst[start..]);
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn secret() -> SharedSecret {
        SharedSecret::from_slice(&[0x5a; 16]).unwrap()
    }

    fn encode_with(codec: &mut FrameCodec, packet: &Packet) -> BytesMut {
        let mut buf = BytesMut::new();
        codec.encode(packet.clone(), &mut buf).unwrap();
        buf
    }

    #[test]
    fn test_plain_frame_layout() {
        let mut codec = FrameCodec::default();
        let buf = encode_with(&mut codec, &Packet::new(0x01, vec![0xaa, 0xbb]));
        assert_eq!(&buf[..], &[0x03, 0x01, 0xaa, 0xbb]);
    }

    #[test]
    fn test_partial_frame_waits_for_more() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&[0x03, 0x01][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&[0xaa, 0xbb]);
        let packet = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(packet, Packet::new(0x01, vec![0xaa, 0xbb]));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_below_threshold_uses_zero_data_length() {
        let mut codec = FrameCodec::default();
        codec.set_threshold(Some(256));
        let buf = encode_with(&mut codec, &Packet::new(0x02, vec![1, 2, 3]));
        assert_eq!(&buf[..], &[0x05, 0x00, 0x02, 1, 2, 3]);
    }

    #[test]
    fn test_above_threshold_is_compressed() {
        let packet = Packet::new(0x21, vec![7u8; 2048]);
        let mut writer = FrameCodec::default();
        writer.set_threshold(Some(256));
        let mut buf = encode_with(&mut writer, &packet);
        assert!(buf.len() < 2048);

        let mut reader = FrameCodec::default();
        reader.set_threshold(Some(256));
        assert_eq!(reader.decode(&mut buf).unwrap().unwrap(), packet);
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut codec = FrameCodec::new(1024);
        let mut buf = BytesMut::new();
        buf.write_varint(4096);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::OversizedPacket(4096))
        ));
    }

    #[test]
    fn test_cipher_installed_once() {
        let mut codec = FrameCodec::default();
        codec.enable_encryption(&secret()).unwrap();
        assert!(matches!(
            codec.enable_encryption(&secret()),
            Err(ProtocolError::CipherAlreadyInstalled)
        ));
        codec.enable_decryption(&secret()).unwrap();
        assert!(matches!(
            codec.enable_decryption(&secret()),
            Err(ProtocolError::CipherAlreadyInstalled)
        ));
    }

    #[test]
    fn test_buffered_bytes_after_negotiation_are_decrypted() {
        let first = Packet::new(0x01, vec![1, 2, 3]);
        let second = Packet::new(0x03, vec![0x80, 0x02]);

        // The plaintext frame and the encrypted frame arrive in one read.
        let mut writer = FrameCodec::default();
        let mut wire = encode_with(&mut writer, &first);
        writer.enable_encryption(&secret()).unwrap();
        wire.extend_from_slice(&encode_with(&mut writer, &second));

        let mut reader = FrameCodec::default();
        assert_eq!(reader.decode(&mut wire).unwrap().unwrap(), first);
        reader.enable_decryption(&secret()).unwrap();
        assert_eq!(reader.decode(&mut wire).unwrap().unwrap(), second);
        assert!(wire.is_empty());
    }

    fn first_frame_is_login_success(packet: &Packet) -> bool {
        packet.id == 0x02 && packet.payload.len() == 4
    }

    fn login_trial(candidates: Vec<SharedSecret>) -> KeyTrial {
        KeyTrial {
            candidates,
            first_ids: &[0x00, 0x02, 0x03],
            accept: first_frame_is_login_success,
        }
    }

    #[test]
    fn test_key_trial_selects_secret_that_decodes() {
        let reply = Packet::new(0x02, vec![1, 2, 3, 4]);
        let mut writer = FrameCodec::default();
        writer.enable_encryption(&secret()).unwrap();
        let wire = encode_with(&mut writer, &reply);

        let wrong = SharedSecret::from_slice(&[0x11; 16]).unwrap();
        let mut reader = FrameCodec::default();
        reader
            .begin_key_trial(login_trial(vec![wrong, secret()]))
            .unwrap();

        // Byte by byte: no decision is made on a partial frame.
        let mut buf = BytesMut::new();
        let mut decoded = None;
        for byte in wire.iter() {
            buf.extend_from_slice(&[*byte]);
            if let Some(packet) = reader.decode(&mut buf).unwrap() {
                decoded = Some(packet);
            }
        }
        assert_eq!(decoded, Some(reply));
        assert_eq!(reader.take_selected(), Some(secret()));
        assert!(reader.is_decrypting());
    }

    #[test]
    fn test_key_trial_without_match_fails() {
        let mut writer = FrameCodec::new(1024);
        writer.enable_encryption(&secret()).unwrap();
        let mut wire = encode_with(&mut writer, &Packet::new(0x02, vec![1, 2, 3, 4]));
        wire.extend_from_slice(&encode_with(&mut writer, &Packet::new(0x03, vec![0x10])));

        let mut reader = FrameCodec::new(1024);
        reader
            .begin_key_trial(login_trial(vec![
                SharedSecret::from_slice(&[0x01; 16]).unwrap(),
                SharedSecret::from_slice(&[0x02; 16]).unwrap(),
            ]))
            .unwrap();
        let mut outcome = reader.decode(&mut wire);
        // A wrong key may read as a longer frame; feed filler until it resolves.
        for _ in 0..8 {
            if !matches!(outcome, Ok(None)) {
                break;
            }
            wire.extend_from_slice(&[0u8; 512]);
            outcome = reader.decode(&mut wire);
        }
        assert!(matches!(outcome, Err(ProtocolError::DecryptionFailure)));
        assert!(!reader.is_decrypting());
    }

    #[test]
    fn test_encrypted_stream_split_across_reads() {
        let packets: Vec<Packet> = (0..5)
            .map(|i| Packet::new(i, vec![i as u8; 40 * i as usize]))
            .collect();
        let mut writer = FrameCodec::default();
        writer.enable_encryption(&secret()).unwrap();
        writer.set_threshold(Some(64));
        let mut wire = BytesMut::new();
        for packet in &packets {
            writer.encode(packet.clone(), &mut wire).unwrap();
        }

        let mut reader = FrameCodec::default();
        reader.enable_decryption(&secret()).unwrap();
        reader.set_threshold(Some(64));
        let mut buf = BytesMut::new();
        let mut decoded = Vec::new();
        for chunk in wire.chunks(7) {
            buf.extend_from_slice(chunk);
            while let Some(packet) = reader.decode(&mut buf).unwrap() {
                decoded.push(packet);
            }
        }
        assert_eq!(decoded, packets);
    }
}
