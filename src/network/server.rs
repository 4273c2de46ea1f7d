//! The node event loop.
//!
//! One task owns the [`Server`] and reacts to three sources: RPCs forwarded
//! from every transport, the block interval, and the quit signal. Everything
//! slow (gossip fan-out) runs on spawned tasks that only report through logs.

use crate::core::block::{Block, HEADER_VERSION, Header, HeaderError};
use crate::core::blockchain::{Blockchain, BlockchainError};
use crate::core::transaction::{Transaction, VerifyError};
use crate::core::validator::{BlockValidator, Validator};
use crate::crypto::key_pair::{CryptoError, PrivateKey};
use crate::network::rpc::{
    DecodeRpcFn, DecodedMessage, DecodedMessageData, Message, Rpc, RpcError, RpcProcessor,
    default_decode_rpc,
};
use crate::network::transport::{Transport, TransportError};
use crate::network::txpool::TxPool;
use crate::storage::storage_trait::Storage;
use crate::types::bytes::Bytes;
use crate::types::encoding::Encode;
use crate::types::hash::Hash;
use crate::utils::clock::unix_nanos;
use crate::{debug, error, info, warn};
use ledger_derive::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{Receiver, Sender, channel};
use tokio::sync::oneshot;
use tokio::time::{Instant, MissedTickBehavior, interval_at};

pub const DEFAULT_BLOCK_TIME: Duration = Duration::from_secs(5);
pub const DEFAULT_RPC_BUFFER: usize = 1024;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("transaction rejected: {0}")]
    Verify(VerifyError),
    #[error("{0}")]
    Chain(BlockchainError),
    #[error("{0}")]
    Crypto(CryptoError),
    #[error("could not build header: {0}")]
    Header(HeaderError),
    #[error("{0}")]
    Rpc(RpcError),
    #[error("{0}")]
    Transport(TransportError),
    #[error("this node has no validator key")]
    NotValidator,
    #[error("chain height {0} cannot be extended")]
    HeightOverflow(u32),
    #[error("message processor failed: {0}")]
    Processor(String),
}

impl From<VerifyError> for ServerError {
    fn from(err: VerifyError) -> Self {
        ServerError::Verify(err)
    }
}

impl From<BlockchainError> for ServerError {
    fn from(err: BlockchainError) -> Self {
        ServerError::Chain(err)
    }
}

impl From<CryptoError> for ServerError {
    fn from(err: CryptoError) -> Self {
        ServerError::Crypto(err)
    }
}

impl From<HeaderError> for ServerError {
    fn from(err: HeaderError) -> Self {
        ServerError::Header(err)
    }
}

impl From<RpcError> for ServerError {
    fn from(err: RpcError) -> Self {
        ServerError::Rpc(err)
    }
}

impl From<TransportError> for ServerError {
    fn from(err: TransportError) -> Self {
        ServerError::Transport(err)
    }
}

/// Which pending transactions go into a produced block.
#[derive(Debug, Clone)]
pub struct BlockProductionPolicy {
    /// Upper bound per block, taken in `first_seen` order. `None` drains the pool.
    pub max_transactions: Option<usize>,
    pub header_version: u32,
}

impl Default for BlockProductionPolicy {
    fn default() -> Self {
        Self {
            max_transactions: None,
            header_version: HEADER_VERSION,
        }
    }
}

pub struct ServerOptions {
    pub transports: Vec<Arc<dyn Transport>>,
    pub block_time: Duration,
    /// Present on the validator only; its presence turns block production on.
    pub private_key: Option<PrivateKey>,
    pub decode_fn: DecodeRpcFn,
    /// Replaces the built-in message dispatch when set.
    pub processor: Option<Arc<dyn RpcProcessor>>,
    pub production: BlockProductionPolicy,
    /// Capacity of the channel all transports forward into.
    pub rpc_buffer: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            transports: Vec::new(),
            block_time: DEFAULT_BLOCK_TIME,
            private_key: None,
            decode_fn: default_decode_rpc,
            processor: None,
            production: BlockProductionPolicy::default(),
            rpc_buffer: DEFAULT_RPC_BUFFER,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Running,
    ShuttingDown,
}

pub struct Server<S: Storage + 'static, V: Validator + 'static = BlockValidator> {
    options: ServerOptions,
    chain: Arc<Blockchain<S, V>>,
    pool: Arc<TxPool>,
    state: ServerState,
    rpc_tx: Sender<Rpc>,
    rpc_rx: Receiver<Rpc>,
}

impl<S: Storage + 'static, V: Validator + 'static> Server<S, V> {
    pub fn new(options: ServerOptions, chain: Arc<Blockchain<S, V>>) -> Self {
        let (rpc_tx, rpc_rx) = channel(options.rpc_buffer.max(1));

        Self {
            options,
            chain,
            pool: Arc::new(TxPool::new()),
            state: ServerState::Running,
            rpc_tx,
            rpc_rx,
        }
    }

    pub fn chain(&self) -> Arc<Blockchain<S, V>> {
        self.chain.clone()
    }

    pub fn pool(&self) -> Arc<TxPool> {
        self.pool.clone()
    }

    /// Injects RPCs into the loop without going through a transport.
    pub fn sender(&self) -> Sender<Rpc> {
        self.rpc_tx.clone()
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn is_validator(&self) -> bool {
        self.options.private_key.is_some()
    }

    /// Runs the event loop until `quit` fires or its sender is dropped.
    ///
    /// Quit is checked first on every iteration, so no event is handled once
    /// it has been observed. Gossip tasks already spawned are not awaited.
    pub async fn run(mut self, mut quit: oneshot::Receiver<()>) -> ServerState {
        self.init_transports();

        let block_time = self.options.block_time;
        let mut ticker = interval_at(Instant::now() + block_time, block_time);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "server started: validator={} height={} transports={}",
            self.is_validator(),
            self.chain.height(),
            self.options.transports.len()
        );

        loop {
            tokio::select! {
                biased;
                _ = &mut quit => {
                    self.state = ServerState::ShuttingDown;
                    break;
                }
                Some(rpc) = self.rpc_rx.recv() => {
                    self.handle_rpc(rpc);
                }
                _ = ticker.tick() => {
                    if self.is_validator()
                        && let Err(err) = self.create_new_block()
                    {
                        error!("failed to create a new block: {err}");
                    }
                }
            }
        }

        info!("server shut down at height {}", self.chain.height());
        self.state
    }

    /// Spawns one task per transport forwarding its inbound queue into the loop.
    fn init_transports(&self) {
        for transport in &self.options.transports {
            let transport = transport.clone();
            let sender = self.rpc_tx.clone();

            tokio::spawn(async move {
                let mut rx = match transport.consume().await {
                    Ok(rx) => rx,
                    Err(err) => {
                        error!("cannot listen on {}: {err}", transport.address());
                        return;
                    }
                };

                while let Some(rpc) = rx.recv().await {
                    if sender.send(rpc).await.is_err() {
                        break;
                    }
                }
                debug!("stopped forwarding from {}", transport.address());
            });
        }
    }

    fn handle_rpc(&self, rpc: Rpc) {
        let from = rpc.from().to_string();
        let decoded = match (self.options.decode_fn)(rpc) {
            Ok(decoded) => decoded,
            Err(err) => {
                warn!("dropping message from {from}: {err}");
                return;
            }
        };

        let result = match &self.options.processor {
            Some(processor) => processor.process_message(decoded),
            None => self.process_message(decoded),
        };
        if let Err(err) = result {
            warn!("failed to process message from {from}: {err}");
        }
    }

    fn process_message(&self, message: DecodedMessage) -> Result<(), ServerError> {
        match message.data {
            DecodedMessageData::Transaction(tx) => self.process_transaction(tx),
            DecodedMessageData::Block(block) => self.process_block(block),
        }
    }

    fn process_transaction(&self, mut tx: Transaction) -> Result<(), ServerError> {
        let hash = tx.hash();
        if self.pool.has(&hash) {
            debug!("transaction already in the pool: hash={hash}");
            return Ok(());
        }

        tx.verify()?;
        tx.set_first_seen(unix_nanos());

        let message = Message::transaction(&tx);
        self.pool.add(tx);
        info!(
            "adding a new transaction to the pool: hash={hash} pool_size={}",
            self.pool.len()
        );

        self.broadcast(message.to_bytes());
        Ok(())
    }

    fn process_block(&self, block: Block) -> Result<(), ServerError> {
        let height = self.chain.add_block(&block)?;

        let included: Vec<Hash> = block.transactions().iter().map(Transaction::hash).collect();
        self.pool.remove_batch(&included);
        debug!("accepted block {} at height {height}", block.hash());
        Ok(())
    }

    /// Drains the pool in `first_seen` order into a signed block on the tip.
    fn create_new_block(&self) -> Result<u32, ServerError> {
        let key = self
            .options
            .private_key
            .as_ref()
            .ok_or(ServerError::NotValidator)?;

        let mut transactions = self.pool.transactions();
        if let Some(max) = self.options.production.max_transactions {
            transactions.truncate(max);
        }

        let tip = self.chain.current_header();
        let header = Header::builder()
            .version(self.options.production.header_version)
            .height(next_height(&tip)?)
            .prev_block_hash(tip.hash())
            .data_hash_of(&transactions)
            .build()?;

        let included: Vec<Hash> = transactions.iter().map(Transaction::hash).collect();
        let mut block = Block::new(header, transactions);
        block.sign(key)?;

        let height = self.chain.add_block(&block)?;
        self.pool.remove_batch(&included);

        info!(
            "created block: height={height} hash={} transactions={}",
            block.hash(),
            included.len()
        );
        self.broadcast(Message::block(&block).to_bytes());
        Ok(height)
    }

    /// Gossips `payload` on every transport from detached tasks.
    fn broadcast(&self, payload: Bytes) {
        for transport in &self.options.transports {
            let transport = transport.clone();
            let payload = payload.clone();

            tokio::spawn(async move {
                if let Err(err) = transport.broadcast(payload).await {
                    warn!("broadcast from {} failed: {err}", transport.address());
                }
            });
        }
    }
}

/// Height of the block extending `tip`.
fn next_height(tip: &Header) -> Result<u32, ServerError> {
    tip.height()
        .checked_add(1)
        .ok_or(ServerError::HeightOverflow(tip.height()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::validator::BlockValidatorError;
    use crate::network::local_transport::LocalTransport;
    use crate::storage::memory_storage::MemoryStorage;
    use crate::types::encoding::Decode;
    use crate::utils::test_utils::utils::{genesis, signed_transaction};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::{sleep, timeout};

    type TestServer = Server<MemoryStorage>;

    fn chain_from(genesis: &Block) -> Arc<Blockchain<MemoryStorage>> {
        Arc::new(Blockchain::new(genesis, MemoryStorage::new()).unwrap())
    }

    fn validator(key: &PrivateKey, options: ServerOptions) -> TestServer {
        let options = ServerOptions {
            private_key: Some(key.clone()),
            ..options
        };
        Server::new(options, chain_from(&genesis(key)))
    }

    fn follower(genesis: &Block, options: ServerOptions) -> TestServer {
        Server::new(options, chain_from(genesis))
    }

    /// Follower that only accepts blocks signed by `authority`.
    fn bound_follower(genesis: &Block, authority: &PrivateKey) -> TestServer {
        let chain = Blockchain::with_validator(
            genesis,
            MemoryStorage::new(),
            BlockValidator::with_authority(authority.public_key()),
        )
        .unwrap();
        Server::new(ServerOptions::default(), Arc::new(chain))
    }

    fn tx_rpc(tx: &Transaction) -> Rpc {
        Rpc::new("REMOTE", Message::transaction(tx).to_bytes())
    }

    fn decoded(tx: Transaction) -> DecodedMessage {
        DecodedMessage {
            from: "REMOTE".into(),
            data: DecodedMessageData::Transaction(tx),
        }
    }

    async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if condition() {
                return true;
            }
            sleep(Duration::from_millis(10)).await;
        }
        condition()
    }

    #[tokio::test]
    async fn valid_transaction_enters_pool_stamped() {
        let server = follower(&genesis(&PrivateKey::new()), ServerOptions::default());
        let tx = signed_transaction(b"Hello World");
        let hash = tx.hash();

        server.process_message(decoded(tx)).unwrap();

        assert!(server.pool.has(&hash));
        assert!(server.pool.transactions()[0].first_seen() > 0);
    }

    #[tokio::test]
    async fn duplicate_transaction_is_skipped() {
        let server = follower(&genesis(&PrivateKey::new()), ServerOptions::default());
        let tx = signed_transaction(b"twice");

        server.process_message(decoded(tx.clone())).unwrap();
        let stamp = server.pool.transactions()[0].first_seen();
        server.process_message(decoded(tx)).unwrap();

        assert_eq!(server.pool.len(), 1);
        assert_eq!(server.pool.transactions()[0].first_seen(), stamp);
    }

    #[tokio::test]
    async fn unsigned_transaction_is_rejected() {
        let server = follower(&genesis(&PrivateKey::new()), ServerOptions::default());

        let result = server.process_message(decoded(Transaction::new("unsigned")));

        assert!(matches!(
            result,
            Err(ServerError::Verify(VerifyError::MissingSignature))
        ));
        assert!(server.pool.is_empty());
    }

    #[tokio::test]
    async fn validator_drains_pool_in_arrival_order() {
        let key = PrivateKey::new();
        let server = validator(&key, ServerOptions::default());
        let first = signed_transaction(b"first");
        let second = signed_transaction(b"second");
        server.process_message(decoded(first.clone())).unwrap();
        sleep(Duration::from_millis(2)).await;
        server.process_message(decoded(second.clone())).unwrap();

        assert_eq!(server.create_new_block().unwrap(), 1);

        assert!(server.pool.is_empty());
        let stored = server.chain.storage().get_block_by_height(1).unwrap();
        assert_eq!(stored.transactions(), &[first, second]);
        assert_eq!(stored.validator(), Some(&key.public_key()));
        assert!(stored.verify().is_ok());
    }

    #[tokio::test]
    async fn production_respects_max_transactions() {
        let key = PrivateKey::new();
        let options = ServerOptions {
            production: BlockProductionPolicy {
                max_transactions: Some(1),
                ..BlockProductionPolicy::default()
            },
            ..ServerOptions::default()
        };
        let server = validator(&key, options);
        server.process_message(decoded(signed_transaction(b"a"))).unwrap();
        server.process_message(decoded(signed_transaction(b"b"))).unwrap();

        server.create_new_block().unwrap();
        assert_eq!(server.pool.len(), 1);
        server.create_new_block().unwrap();
        assert!(server.pool.is_empty());
        assert_eq!(server.chain.height(), 2);
    }

    #[tokio::test]
    async fn empty_pool_still_produces_a_block() {
        let server = validator(&PrivateKey::new(), ServerOptions::default());
        assert_eq!(server.create_new_block().unwrap(), 1);
        assert!(server.chain.current_header().data_hash().is_zero());
    }

    #[test]
    fn next_height_refuses_to_wrap() {
        let tip = |height| {
            Header::builder()
                .height(height)
                .prev_block_hash(Hash::zero())
                .build()
                .unwrap()
        };

        assert_eq!(next_height(&tip(41)).unwrap(), 42);
        assert!(matches!(
            next_height(&tip(u32::MAX)),
            Err(ServerError::HeightOverflow(u32::MAX))
        ));
    }

    #[tokio::test]
    async fn follower_cannot_produce_blocks() {
        let server = follower(&genesis(&PrivateKey::new()), ServerOptions::default());
        assert!(matches!(
            server.create_new_block(),
            Err(ServerError::NotValidator)
        ));
        assert_eq!(server.chain.height(), 0);
    }

    #[tokio::test]
    async fn follower_accepts_produced_block() {
        let key = PrivateKey::new();
        let genesis = genesis(&key);
        let producer = Server::new(
            ServerOptions {
                private_key: Some(key.clone()),
                ..ServerOptions::default()
            },
            chain_from(&genesis),
        );
        let follower = bound_follower(&genesis, &key);

        let tx = signed_transaction(b"shared");
        producer.process_message(decoded(tx.clone())).unwrap();
        follower.process_message(decoded(tx)).unwrap();
        producer.create_new_block().unwrap();

        let block = producer.chain.storage().get_block_by_height(1).unwrap();
        follower
            .process_message(DecodedMessage {
                from: "PRODUCER".into(),
                data: DecodedMessageData::Block((*block).clone()),
            })
            .unwrap();

        assert_eq!(follower.chain.height(), 1);
        assert_eq!(follower.chain.get_block_hash(1).unwrap(), block.hash());
        assert!(follower.pool.is_empty());

        let again = follower.process_message(DecodedMessage {
            from: "PRODUCER".into(),
            data: DecodedMessageData::Block((*block).clone()),
        });
        assert!(matches!(again, Err(ServerError::Chain(_))));
    }

    #[tokio::test]
    async fn bound_follower_rejects_foreign_signer() {
        let key = PrivateKey::new();
        let genesis = genesis(&key);
        let impostor = Server::new(
            ServerOptions {
                private_key: Some(PrivateKey::new()),
                ..ServerOptions::default()
            },
            chain_from(&genesis),
        );
        let follower = bound_follower(&genesis, &key);

        impostor
            .process_message(decoded(signed_transaction(b"forged")))
            .unwrap();
        impostor.create_new_block().unwrap();
        let block = impostor.chain.storage().get_block_by_height(1).unwrap();
        assert!(block.verify().is_ok());

        let result = follower.process_message(DecodedMessage {
            from: "IMPOSTOR".into(),
            data: DecodedMessageData::Block((*block).clone()),
        });
        assert!(matches!(
            result,
            Err(ServerError::Chain(BlockchainError::Validation(
                BlockValidatorError::UnauthorizedValidator(_)
            )))
        ));
        assert_eq!(follower.chain.height(), 0);
    }

    #[tokio::test]
    async fn admitted_transaction_is_gossiped() {
        let local = LocalTransport::new("LOCAL");
        let peer = LocalTransport::new("PEER");
        local.connect(peer.clone()).unwrap();
        let mut inbox = peer.consume().await.unwrap();

        let options = ServerOptions {
            transports: vec![local.clone() as Arc<dyn Transport>],
            ..ServerOptions::default()
        };
        let server = follower(&genesis(&PrivateKey::new()), options);
        let tx = signed_transaction(b"gossip");
        server.process_message(decoded(tx.clone())).unwrap();

        let rpc = timeout(Duration::from_secs(2), inbox.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rpc.from(), "LOCAL");
        let message = Message::from_bytes(rpc.payload().as_slice()).unwrap();
        assert_eq!(message.header(), crate::network::rpc::MessageType::Transaction);
        assert_eq!(Transaction::from_bytes(message.data().as_slice()).unwrap(), tx);
    }

    #[tokio::test]
    async fn loop_admits_transactions_from_transports() {
        let local = LocalTransport::new("LOCAL");
        let remote = LocalTransport::new("REMOTE");
        remote.connect(local.clone()).unwrap();

        let options = ServerOptions {
            transports: vec![local.clone() as Arc<dyn Transport>],
            ..ServerOptions::default()
        };
        let server = follower(&genesis(&PrivateKey::new()), options);
        let pool = server.pool();
        let sender = server.sender();
        let (quit_tx, quit_rx) = oneshot::channel();
        let handle = tokio::spawn(server.run(quit_rx));

        // A malformed message must not stop the loop.
        sender.send(Rpc::new("REMOTE", vec![0x1, 0xff])).await.unwrap();
        let tx = signed_transaction(b"over the wire");
        remote
            .send(local.address(), Message::transaction(&tx).to_bytes())
            .await
            .unwrap();

        assert!(eventually(|| pool.has(&tx.hash())).await);

        quit_tx.send(()).unwrap();
        let state = timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
        assert_eq!(state, ServerState::ShuttingDown);
    }

    #[tokio::test]
    async fn loop_produces_blocks_on_the_interval() {
        let key = PrivateKey::new();
        let options = ServerOptions {
            block_time: Duration::from_millis(20),
            ..ServerOptions::default()
        };
        let server = validator(&key, options);
        let chain = server.chain();
        let sender = server.sender();
        let (quit_tx, quit_rx) = oneshot::channel();
        let handle = tokio::spawn(server.run(quit_rx));

        let tx = signed_transaction(b"in a block");
        sender.send(tx_rpc(&tx)).await.unwrap();

        assert!(
            eventually(|| {
                (1..=chain.height()).any(|height| {
                    chain
                        .storage()
                        .get_block_by_height(height)
                        .is_some_and(|block| block.transactions().contains(&tx))
                })
            })
            .await
        );

        quit_tx.send(()).unwrap();
        timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn dropping_quit_sender_stops_the_loop() {
        let server = follower(&genesis(&PrivateKey::new()), ServerOptions::default());
        let (quit_tx, quit_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.run(quit_rx));

        drop(quit_tx);
        let state = timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
        assert_eq!(state, ServerState::ShuttingDown);
    }

    struct Counting(AtomicUsize);

    impl RpcProcessor for Counting {
        fn process_message(&self, _: DecodedMessage) -> Result<(), ServerError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn custom_processor_replaces_dispatch() {
        let counter = Arc::new(Counting(AtomicUsize::new(0)));
        let options = ServerOptions {
            processor: Some(counter.clone() as Arc<dyn RpcProcessor>),
            ..ServerOptions::default()
        };
        let server = follower(&genesis(&PrivateKey::new()), options);
        let pool = server.pool();

        server.handle_rpc(tx_rpc(&signed_transaction(b"custom")));

        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert!(pool.is_empty());
    }
}
