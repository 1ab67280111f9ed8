use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

use broker_api::{
    BrokerError, InitialPosition, MessageId, NON_PARTITION_INDEX, OutgoingMessage,
    PartitionedTopicMetadata, ProducerAccessMode, RawMessage, SchemaInfo, SchemaType,
    SubscriptionMode, SubscriptionType, TenantInfo, TopicName, TxnId, now_ms,
};

const TOPIC_EXISTS: &str = "This topic already exists";

// ═══════════════════════════════════════════════════════════════
//  Log entries, cursors, transactions
// ═══════════════════════════════════════════════════════════════

struct Entry {
    key: Option<String>,
    payload: Vec<u8>,
    publish_time_ms: i64,
    txn: Option<TxnId>,
}

/// Durable read position of one subscription on one partition.
#[derive(Default)]
struct Cursor {
    /// Every entry below this index is acknowledged.
    mark_delete: usize,
    /// Acknowledged entries at or above `mark_delete`.
    acked: BTreeSet<usize>,
    /// Delivered but unacknowledged entries → consumer id.
    pending: BTreeMap<usize, u64>,
    consumers: BTreeMap<u64, SubscriptionType>,
    mode: SubscriptionMode,
}

impl Cursor {
    fn at(position: usize, mode: SubscriptionMode) -> Self {
        Self { mark_delete: position, mode, ..Self::default() }
    }

    fn is_consumed(&self, index: usize) -> bool {
        index < self.mark_delete || self.acked.contains(&index) || self.pending.contains_key(&index)
    }

    fn acknowledge(&mut self, index: usize) {
        self.pending.remove(&index);
        if index < self.mark_delete {
            return;
        }
        self.acked.insert(index);
        while self.acked.remove(&self.mark_delete) {
            self.mark_delete += 1;
        }
    }
}

/// Physical topic: one partition, or a whole non-partitioned topic.
struct PartitionLog {
    ledger_id: u64,
    partition: i32,
    entries: Vec<Entry>,
    cursors: BTreeMap<String, Cursor>,
    producers: BTreeMap<u64, ProducerAccessMode>,
}

impl PartitionLog {
    fn new(ledger_id: u64, partition: i32) -> Self {
        Self {
            ledger_id,
            partition,
            entries: Vec::new(),
            cursors: BTreeMap::new(),
            producers: BTreeMap::new(),
        }
    }

    fn initial_position(&self, position: InitialPosition) -> usize {
        match position {
            InitialPosition::Earliest => 0,
            InitialPosition::Latest => self.entries.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxnStatus {
    Open,
    Committed,
    Aborted,
}

struct Transaction {
    status: TxnStatus,
    deadline: Instant,
}

enum Visibility {
    Visible,
    Skip,
    /// An open transaction: nothing at or after this entry may be read yet.
    Blocked,
}

fn visibility(transactions: &mut HashMap<TxnId, Transaction>, txn: Option<TxnId>) -> Visibility {
    let Some(id) = txn else {
        return Visibility::Visible;
    };
    match transactions.get_mut(&id) {
        Some(t) => match t.status {
            TxnStatus::Committed => Visibility::Visible,
            TxnStatus::Aborted => Visibility::Skip,
            TxnStatus::Open if Instant::now() >= t.deadline => {
                tracing::debug!(txn = %id, "transaction timed out, aborting");
                t.status = TxnStatus::Aborted;
                Visibility::Skip
            }
            TxnStatus::Open => Visibility::Blocked,
        },
        None => Visibility::Skip,
    }
}

// ═══════════════════════════════════════════════════════════════
//  BrokerState
// ═══════════════════════════════════════════════════════════════

/// Everything the embedded broker knows. Guarded by one mutex in `Shared`.
pub(crate) struct BrokerState {
    clusters: Vec<String>,
    auto_create_topics: bool,
    tenants: BTreeMap<String, TenantInfo>,
    namespaces: BTreeSet<String>,
    /// Logical topic → partition count (0 = non-partitioned).
    topics: BTreeMap<String, u32>,
    /// Physical topic → log.
    logs: HashMap<String, PartitionLog>,
    /// Logical topic → registered schema.
    schemas: HashMap<String, SchemaInfo>,
    transactions: HashMap<TxnId, Transaction>,
    next_ledger_id: u64,
    next_txn_id: u64,
    next_handle_id: u64,
}

impl BrokerState {
    pub(crate) fn new(cluster: &str, auto_create_topics: bool) -> Self {
        let mut state = Self {
            clusters: vec![cluster.to_string()],
            auto_create_topics,
            tenants: BTreeMap::new(),
            namespaces: BTreeSet::new(),
            topics: BTreeMap::new(),
            logs: HashMap::new(),
            schemas: HashMap::new(),
            transactions: HashMap::new(),
            next_ledger_id: 0,
            next_txn_id: 0,
            next_handle_id: 0,
        };
        let allowed_clusters = state.clusters.iter().cloned().collect();
        state.tenants.insert("public".into(), TenantInfo { allowed_clusters });
        state.namespaces.insert("public/default".into());
        state
    }

    pub(crate) fn next_handle_id(&mut self) -> u64 {
        self.next_handle_id += 1;
        self.next_handle_id
    }

    fn new_log(&mut self, physical: String, partition: i32) {
        self.next_ledger_id += 1;
        self.logs.insert(physical, PartitionLog::new(self.next_ledger_id, partition));
    }

    // ── Tenants & namespaces ──

    pub(crate) fn clusters(&self) -> Vec<String> {
        self.clusters.clone()
    }

    pub(crate) fn tenants(&self) -> Vec<String> {
        self.tenants.keys().cloned().collect()
    }

    pub(crate) fn create_tenant(&mut self, tenant: &str, info: TenantInfo) -> Result<(), BrokerError> {
        if tenant.is_empty() || tenant.contains('/') {
            return Err(BrokerError::invalid_argument(format!("invalid tenant name '{tenant}'")));
        }
        if self.tenants.contains_key(tenant) {
            return Err(BrokerError::already_exists("Tenant already exists"));
        }
        if let Some(unknown) = info.allowed_clusters.iter().find(|c| !self.clusters.contains(c)) {
            return Err(BrokerError::invalid_argument(format!("Cluster '{unknown}' does not exist")));
        }
        self.tenants.insert(tenant.to_string(), info);
        Ok(())
    }

    pub(crate) fn namespaces(&self, tenant: &str) -> Result<Vec<String>, BrokerError> {
        if !self.tenants.contains_key(tenant) {
            return Err(BrokerError::not_found("Tenant does not exist"));
        }
        let prefix = format!("{tenant}/");
        Ok(self
            .namespaces
            .iter()
            .filter(|ns| ns.starts_with(&prefix))
            .cloned()
            .collect())
    }

    pub(crate) fn create_namespace(&mut self, namespace: &str) -> Result<(), BrokerError> {
        let (tenant, _) = namespace
            .split_once('/')
            .filter(|(t, n)| !t.is_empty() && !n.is_empty() && !n.contains('/'))
            .ok_or_else(|| BrokerError::invalid_argument(format!("invalid namespace name '{namespace}'")))?;
        if !self.tenants.contains_key(tenant) {
            return Err(BrokerError::not_found("Tenant does not exist"));
        }
        if !self.namespaces.insert(namespace.to_string()) {
            return Err(BrokerError::already_exists("Namespace already exists"));
        }
        Ok(())
    }

    // ── Topics ──

    fn ensure_namespace(&self, name: &TopicName) -> Result<(), BrokerError> {
        if self.namespaces.contains(&name.namespace()) {
            Ok(())
        } else {
            Err(BrokerError::not_found(format!("Namespace {} does not exist", name.namespace())))
        }
    }

    fn topic_exists(&self, name: &TopicName) -> bool {
        self.topics.contains_key(&name.full_name())
            || (name.is_partition() && self.topics.contains_key(&name.partitioned_topic().full_name()))
    }

    pub(crate) fn create_non_partitioned_topic(&mut self, topic: &str) -> Result<(), BrokerError> {
        let name = TopicName::parse(topic)?;
        self.ensure_namespace(&name)?;
        if self.topic_exists(&name) {
            return Err(BrokerError::already_exists(TOPIC_EXISTS));
        }
        let full = name.full_name();
        self.topics.insert(full.clone(), PartitionedTopicMetadata::NON_PARTITIONED);
        self.new_log(full, NON_PARTITION_INDEX);
        Ok(())
    }

    pub(crate) fn create_partitioned_topic(&mut self, topic: &str, partitions: u32) -> Result<(), BrokerError> {
        if partitions == 0 {
            return Err(BrokerError::invalid_argument("Number of partitions should be more than 0"));
        }
        let name = TopicName::parse(topic)?;
        if name.is_partition() {
            return Err(BrokerError::invalid_argument(format!(
                "partitioned topic name '{topic}' must not carry a partition suffix"
            )));
        }
        self.ensure_namespace(&name)?;
        if self.topic_exists(&name) {
            return Err(BrokerError::already_exists(TOPIC_EXISTS));
        }
        self.topics.insert(name.full_name(), partitions);
        for index in 0..partitions {
            self.new_log(name.partition(index).full_name(), index as i32);
        }
        Ok(())
    }

    pub(crate) fn partitioned_topic_metadata(&self, topic: &str) -> Result<PartitionedTopicMetadata, BrokerError> {
        let name = TopicName::parse(topic)?;
        match self.topics.get(&name.full_name()) {
            Some(&partitions) => Ok(PartitionedTopicMetadata { partitions }),
            None if self.topic_exists(&name) => Ok(PartitionedTopicMetadata {
                partitions: PartitionedTopicMetadata::NON_PARTITIONED,
            }),
            None => Err(BrokerError::not_found(format!("Topic {} not found", name.full_name()))),
        }
    }

    pub(crate) fn update_partitioned_topic(&mut self, topic: &str, partitions: u32) -> Result<(), BrokerError> {
        let name = TopicName::parse(topic)?;
        let full = name.full_name();
        let current = *self
            .topics
            .get(&full)
            .ok_or_else(|| BrokerError::not_found(format!("Topic {full} not found")))?;
        if current == PartitionedTopicMetadata::NON_PARTITIONED {
            return Err(BrokerError::invalid_argument(format!("Topic {full} is not partitioned")));
        }
        if partitions <= current {
            return Err(BrokerError::invalid_argument(
                "Number of partitions must be more than existing",
            ));
        }

        let subscriptions: Vec<(String, SubscriptionMode)> = self
            .logs
            .get(&name.partition(0).full_name())
            .map(|log| {
                log.cursors
                    .iter()
                    .map(|(sub, cursor)| (sub.clone(), cursor.mode))
                    .collect()
            })
            .unwrap_or_default();

        for index in current..partitions {
            let physical = name.partition(index).full_name();
            self.new_log(physical.clone(), index as i32);
            if let Some(log) = self.logs.get_mut(&physical) {
                for (sub, mode) in &subscriptions {
                    log.cursors.insert(sub.clone(), Cursor::at(0, *mode));
                }
            }
        }
        self.topics.insert(full, partitions);
        Ok(())
    }

    pub(crate) fn delete_topic(&mut self, topic: &str) -> Result<(), BrokerError> {
        let name = TopicName::parse(topic)?;
        let full = name.full_name();
        match self.topics.get(&full) {
            None => Err(BrokerError::not_found(format!("Topic {full} not found"))),
            Some(&p) if p != PartitionedTopicMetadata::NON_PARTITIONED => Err(BrokerError::invalid_argument(
                format!("Topic {full} is partitioned, delete it as a partitioned topic"),
            )),
            Some(_) => {
                self.topics.remove(&full);
                self.logs.remove(&full);
                self.schemas.remove(&full);
                Ok(())
            }
        }
    }

    pub(crate) fn delete_partitioned_topic(&mut self, topic: &str) -> Result<(), BrokerError> {
        let name = TopicName::parse(topic)?;
        let full = name.full_name();
        match self.topics.get(&full).copied() {
            None => Err(BrokerError::not_found(format!("Partitioned topic {full} not found"))),
            Some(PartitionedTopicMetadata::NON_PARTITIONED) => Err(BrokerError::invalid_argument(
                format!("Topic {full} is not partitioned"),
            )),
            Some(partitions) => {
                for index in 0..partitions {
                    self.logs.remove(&name.partition(index).full_name());
                }
                self.topics.remove(&full);
                self.schemas.remove(&full);
                Ok(())
            }
        }
    }

    /// Physical topics behind `topic`. Auto-creates a non-partitioned topic
    /// when allowed.
    pub(crate) fn resolve(&mut self, topic: &str, auto_create: bool) -> Result<(TopicName, Vec<String>), BrokerError> {
        let name = TopicName::parse(topic)?;
        let full = name.full_name();

        if let Some(&partitions) = self.topics.get(&full) {
            let physical = if partitions == PartitionedTopicMetadata::NON_PARTITIONED {
                vec![full]
            } else {
                (0..partitions).map(|i| name.partition(i).full_name()).collect()
            };
            return Ok((name, physical));
        }

        if name.is_partition() {
            let base = name.partitioned_topic().full_name();
            if let Some(&partitions) = self.topics.get(&base) {
                let index = name.partition_index();
                if index >= 0 && (index as u32) < partitions {
                    return Ok((name, vec![full]));
                }
            }
        }

        if auto_create && self.auto_create_topics && !name.is_partition() {
            tracing::debug!(topic = %full, "auto-creating topic");
            self.create_non_partitioned_topic(&full)?;
            return Ok((name, vec![full]));
        }

        Err(BrokerError::not_found(format!("Topic {full} not found")))
    }

    // ── Subscriptions & schemas ──

    pub(crate) fn subscriptions(&mut self, topic: &str) -> Result<Vec<String>, BrokerError> {
        let (_, physical) = self.resolve(topic, false)?;
        let mut names = BTreeSet::new();
        for p in &physical {
            if let Some(log) = self.logs.get(p) {
                names.extend(log.cursors.keys().cloned());
            }
        }
        Ok(names.into_iter().collect())
    }

    pub(crate) fn create_subscription(
        &mut self,
        topic: &str,
        subscription: &str,
        position: InitialPosition,
    ) -> Result<(), BrokerError> {
        if subscription.is_empty() {
            return Err(BrokerError::invalid_argument("subscription name is empty"));
        }
        let (_, physical) = self.resolve(topic, false)?;
        let exists = physical.iter().any(|p| {
            self.logs
                .get(p)
                .is_some_and(|log| log.cursors.contains_key(subscription))
        });
        if exists {
            return Err(BrokerError::already_exists("Subscription already exists for topic"));
        }
        for p in &physical {
            if let Some(log) = self.logs.get_mut(p) {
                let start = log.initial_position(position);
                log.cursors
                    .insert(subscription.to_string(), Cursor::at(start, SubscriptionMode::Durable));
            }
        }
        Ok(())
    }

    pub(crate) fn create_schema(&mut self, topic: &str, schema: SchemaInfo) -> Result<(), BrokerError> {
        let (name, _) = self.resolve(topic, false)?;
        self.schemas.insert(name.partitioned_topic().full_name(), schema);
        Ok(())
    }

    // ── Producers ──

    pub(crate) fn attach_producer(
        &mut self,
        topic: &str,
        producer_id: u64,
        schema: &SchemaInfo,
        multi_schema: bool,
        access_mode: ProducerAccessMode,
    ) -> Result<Vec<String>, BrokerError> {
        let (name, physical) = self.resolve(topic, true)?;
        let logical = name.partitioned_topic().full_name();

        match self.schemas.get(&logical) {
            Some(registered) if registered != schema && !multi_schema => {
                return Err(BrokerError::incompatible_schema(format!(
                    "topic {logical} has schema {} but producer uses {}",
                    registered.schema_type, schema.schema_type
                )));
            }
            None if schema.schema_type != SchemaType::Bytes => {
                self.schemas.insert(logical, schema.clone());
            }
            _ => {}
        }

        for p in &physical {
            let log = self
                .logs
                .get(p)
                .ok_or_else(|| BrokerError::not_found(format!("Topic {p} not found")))?;
            let exclusive_held = log.producers.values().any(|m| *m == ProducerAccessMode::Exclusive);
            if exclusive_held || (access_mode == ProducerAccessMode::Exclusive && !log.producers.is_empty()) {
                return Err(BrokerError::conflict(format!("Topic {p} has an exclusive producer")));
            }
        }
        for p in &physical {
            if let Some(log) = self.logs.get_mut(p) {
                log.producers.insert(producer_id, access_mode);
            }
        }
        Ok(physical)
    }

    pub(crate) fn detach_producer(&mut self, physical: &[String], producer_id: u64) {
        for p in physical {
            if let Some(log) = self.logs.get_mut(p) {
                log.producers.remove(&producer_id);
            }
        }
    }

    /// Append a message. A key picks the partition by hash, no key means
    /// the caller's round-robin slot.
    pub(crate) fn append(
        &mut self,
        physical: &[String],
        round_robin: usize,
        message: OutgoingMessage,
    ) -> Result<MessageId, BrokerError> {
        if physical.is_empty() {
            return Err(BrokerError::unavailable("producer has no partitions"));
        }
        if let Some(id) = message.txn {
            match self.transactions.get(&id) {
                Some(t) if t.status == TxnStatus::Open && Instant::now() < t.deadline => {}
                Some(_) => return Err(BrokerError::transaction(format!("transaction {id} is not open"))),
                None => return Err(BrokerError::transaction(format!("unknown transaction {id}"))),
            }
        }

        let slot = match &message.key {
            Some(key) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                (hasher.finish() % physical.len() as u64) as usize
            }
            None => round_robin % physical.len(),
        };
        let target = &physical[slot];
        let log = self
            .logs
            .get_mut(target)
            .ok_or_else(|| BrokerError::unavailable(format!("Topic {target} was deleted")))?;

        let entry_id = log.entries.len() as u64;
        log.entries.push(Entry {
            key: message.key,
            payload: message.payload,
            publish_time_ms: now_ms(),
            txn: message.txn,
        });
        Ok(MessageId {
            ledger_id: log.ledger_id,
            entry_id,
            partition: log.partition,
        })
    }

    // ── Consumers ──

    pub(crate) fn attach_consumer(
        &mut self,
        topic: &str,
        subscription: &str,
        consumer_id: u64,
        kind: SubscriptionType,
        mode: SubscriptionMode,
        position: InitialPosition,
    ) -> Result<Vec<String>, BrokerError> {
        if subscription.is_empty() {
            return Err(BrokerError::invalid_argument("subscription name is empty"));
        }
        let (_, physical) = self.resolve(topic, true)?;

        for p in &physical {
            let Some(cursor) = self.logs.get(p).and_then(|log| log.cursors.get(subscription)) else {
                continue;
            };
            let busy = match kind {
                SubscriptionType::Exclusive => !cursor.consumers.is_empty(),
                SubscriptionType::Shared => cursor.consumers.values().any(|k| *k == SubscriptionType::Exclusive),
            };
            if busy {
                return Err(BrokerError::conflict(format!(
                    "Exclusive consumer is already connected to subscription '{subscription}'"
                )));
            }
        }

        for p in &physical {
            if let Some(log) = self.logs.get_mut(p) {
                let start = log.initial_position(position);
                let cursor = log
                    .cursors
                    .entry(subscription.to_string())
                    .or_insert_with(|| Cursor::at(start, mode));
                cursor.consumers.insert(consumer_id, kind);
            }
        }
        Ok(physical)
    }

    pub(crate) fn detach_consumer(&mut self, physical: &[String], subscription: &str, consumer_id: u64) {
        for p in physical {
            let Some(log) = self.logs.get_mut(p) else {
                continue;
            };
            let Some(cursor) = log.cursors.get_mut(subscription) else {
                continue;
            };
            cursor.consumers.remove(&consumer_id);
            cursor.pending.retain(|_, owner| *owner != consumer_id);
            if cursor.mode == SubscriptionMode::NonDurable && cursor.consumers.is_empty() {
                log.cursors.remove(subscription);
            }
        }
    }

    /// Next deliverable message for `consumer_id`, starting the scan at
    /// partition `start`. Marks it pending for that consumer.
    pub(crate) fn next_message(
        &mut self,
        physical: &[String],
        subscription: &str,
        consumer_id: u64,
        start: usize,
    ) -> Result<Option<(usize, RawMessage)>, BrokerError> {
        let BrokerState { logs, transactions, .. } = self;

        for offset in 0..physical.len() {
            let slot = (start + offset) % physical.len();
            let topic = &physical[slot];
            let log = logs
                .get_mut(topic)
                .ok_or_else(|| BrokerError::unavailable(format!("Topic {topic} was deleted")))?;
            let cursor = log.cursors.get_mut(subscription).ok_or_else(|| {
                BrokerError::unavailable(format!("Subscription '{subscription}' on {topic} was removed"))
            })?;

            let mut index = cursor.mark_delete;
            while index < log.entries.len() {
                if cursor.is_consumed(index) {
                    index += 1;
                    continue;
                }
                let entry = &log.entries[index];
                match visibility(transactions, entry.txn) {
                    Visibility::Visible => {
                        cursor.pending.insert(index, consumer_id);
                        let message = RawMessage {
                            id: MessageId {
                                ledger_id: log.ledger_id,
                                entry_id: index as u64,
                                partition: log.partition,
                            },
                            topic: topic.clone(),
                            key: entry.key.clone(),
                            payload: entry.payload.clone(),
                            publish_time_ms: entry.publish_time_ms,
                        };
                        return Ok(Some((slot, message)));
                    }
                    Visibility::Skip => {
                        // Aborted entries never become visible.
                        cursor.acknowledge(index);
                        index += 1;
                    }
                    Visibility::Blocked => break,
                }
            }
        }
        Ok(None)
    }

    pub(crate) fn acknowledge(&mut self, physical: &[String], subscription: &str, id: MessageId) -> Result<(), BrokerError> {
        let topic = physical
            .iter()
            .find(|p| self.logs.get(*p).is_some_and(|log| log.ledger_id == id.ledger_id))
            .ok_or_else(|| BrokerError::invalid_argument(format!("message {id} does not belong to this consumer")))?;
        let log = self
            .logs
            .get_mut(topic)
            .ok_or_else(|| BrokerError::unavailable(format!("Topic {topic} was deleted")))?;
        let cursor = log
            .cursors
            .get_mut(subscription)
            .ok_or_else(|| BrokerError::unavailable(format!("Subscription '{subscription}' was removed")))?;
        cursor.acknowledge(id.entry_id as usize);
        Ok(())
    }

    // ── Transactions ──

    pub(crate) fn new_transaction(&mut self, timeout: Duration) -> Result<TxnId, BrokerError> {
        if timeout.is_zero() {
            return Err(BrokerError::invalid_argument("transaction timeout must be positive"));
        }
        self.next_txn_id += 1;
        let id = TxnId { most_bits: 0, least_bits: self.next_txn_id };
        self.transactions.insert(
            id,
            Transaction { status: TxnStatus::Open, deadline: Instant::now() + timeout },
        );
        Ok(id)
    }

    /// Earliest future deadline among transactions still open. A reader
    /// blocked behind one must rescan once it passes.
    pub(crate) fn next_transaction_deadline(&self) -> Option<Instant> {
        let now = Instant::now();
        self.transactions
            .values()
            .filter(|t| t.status == TxnStatus::Open && t.deadline > now)
            .map(|t| t.deadline)
            .min()
    }

    pub(crate) fn commit(&mut self, id: TxnId) -> Result<(), BrokerError> {
        let txn = self
            .transactions
            .get_mut(&id)
            .ok_or_else(|| BrokerError::transaction(format!("unknown transaction {id}")))?;
        match txn.status {
            TxnStatus::Open if Instant::now() >= txn.deadline => {
                txn.status = TxnStatus::Aborted;
                Err(BrokerError::transaction(format!("transaction {id} timed out")))
            }
            TxnStatus::Open => {
                txn.status = TxnStatus::Committed;
                Ok(())
            }
            TxnStatus::Committed => Ok(()),
            TxnStatus::Aborted => Err(BrokerError::transaction(format!("transaction {id} was aborted"))),
        }
    }

    pub(crate) fn abort(&mut self, id: TxnId) -> Result<(), BrokerError> {
        let txn = self
            .transactions
            .get_mut(&id)
            .ok_or_else(|| BrokerError::transaction(format!("unknown transaction {id}")))?;
        match txn.status {
            TxnStatus::Open | TxnStatus::Aborted => {
                txn.status = TxnStatus::Aborted;
                Ok(())
            }
            TxnStatus::Committed => Err(BrokerError::transaction(format!("transaction {id} is already committed"))),
        }
    }
}
