//! Wallet balances and their append-only transaction log.
//!
//! Every wallet and every transaction lives in one [`Book`] behind a single
//! mutex, so a balance change and the log row describing it are applied under
//! the same lock and either both happen or neither does. All validation runs
//! before the first mutation.
//!
//! Withdrawals are two-phase: a request appends a pending debit without
//! touching the balance, and only an approved review moves money. Balance is
//! therefore always the sum of completed credits minus completed debits.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::error::AppError;
use crate::models::party::Role;
use crate::models::wallet::{
    PaymentMeta, Transaction, TransactionStatus, TransactionType, Wallet, WithdrawalDecision,
};

/// Credit owed to whoever referred a customer, paid with their first delivery.
#[derive(Debug, Clone)]
pub struct ReferralReward {
    pub referrer_id: i64,
    pub referrer_role: Role,
    pub amount: Decimal,
    pub referee_name: String,
}

#[derive(Debug, Clone)]
pub struct DeliverySettlement {
    pub order_id: i64,
    pub order_code: String,
    pub courier_id: i64,
    pub courier_net: Decimal,
    pub referral: Option<ReferralReward>,
}

#[derive(Debug, Clone)]
pub struct SettlementReceipt {
    pub courier_wallet: Wallet,
    pub courier_credit: Option<Transaction>,
    pub referral: Option<(Wallet, Transaction)>,
}

#[derive(Default)]
struct Book {
    wallets: HashMap<i64, Wallet>,
    owners: HashMap<(i64, Role), i64>,
    transactions: BTreeMap<i64, Transaction>,
    last_wallet_id: i64,
    last_transaction_id: i64,
}

impl Book {
    fn wallet_id_for(&mut self, user_id: i64, role: Role, now: DateTime<Utc>) -> i64 {
        if let Some(id) = self.owners.get(&(user_id, role)) {
            return *id;
        }

        self.last_wallet_id += 1;
        let id = self.last_wallet_id;
        self.wallets.insert(
            id,
            Wallet {
                id,
                user_id,
                role,
                balance: Decimal::ZERO,
                created_at: now,
                updated_at: now,
            },
        );
        self.owners.insert((user_id, role), id);
        id
    }

    fn wallet_mut(&mut self, wallet_id: i64) -> Result<&mut Wallet, AppError> {
        self.wallets
            .get_mut(&wallet_id)
            .ok_or_else(|| AppError::NotFound(format!("wallet {wallet_id} not found")))
    }

    #[allow(clippy::too_many_arguments)]
    fn append(
        &mut self,
        wallet_id: i64,
        amount: Decimal,
        kind: TransactionType,
        status: TransactionStatus,
        description: String,
        order_id: Option<i64>,
        payment: Option<PaymentMeta>,
        now: DateTime<Utc>,
    ) -> Transaction {
        self.last_transaction_id += 1;
        let transaction = Transaction {
            id: self.last_transaction_id,
            wallet_id,
            amount,
            kind,
            status,
            description,
            order_id,
            payment,
            created_at: now,
            updated_at: now,
        };
        self.transactions
            .insert(transaction.id, transaction.clone());
        transaction
    }

    /// Balance change plus its completed credit row.
    fn credit(
        &mut self,
        wallet_id: i64,
        amount: Decimal,
        description: String,
        order_id: Option<i64>,
        payment: Option<PaymentMeta>,
        now: DateTime<Utc>,
    ) -> Result<(Wallet, Transaction), AppError> {
        let wallet = self.wallet_mut(wallet_id)?;
        wallet.balance += amount;
        wallet.updated_at = now;
        let wallet = wallet.clone();

        let transaction = self.append(
            wallet_id,
            amount,
            TransactionType::Credit,
            TransactionStatus::Completed,
            description,
            order_id,
            payment,
            now,
        );
        Ok((wallet, transaction))
    }
}

#[derive(Default)]
pub struct Ledger {
    book: Mutex<Book>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create_wallet(&self, user_id: i64, role: Role) -> Wallet {
        let mut book = self.book.lock();
        let id = book.wallet_id_for(user_id, role, Utc::now());
        book.wallets[&id].clone()
    }

    pub fn wallet(&self, wallet_id: i64) -> Result<Wallet, AppError> {
        let book = self.book.lock();
        book.wallets
            .get(&wallet_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("wallet {wallet_id} not found")))
    }

    pub fn transaction(&self, transaction_id: i64) -> Result<Transaction, AppError> {
        let book = self.book.lock();
        book.transactions
            .get(&transaction_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("transaction {transaction_id} not found")))
    }

    /// Newest first.
    pub fn transactions(&self, wallet_id: i64) -> Result<Vec<Transaction>, AppError> {
        let book = self.book.lock();
        if !book.wallets.contains_key(&wallet_id) {
            return Err(AppError::NotFound(format!("wallet {wallet_id} not found")));
        }

        Ok(book
            .transactions
            .values()
            .rev()
            .filter(|transaction| transaction.wallet_id == wallet_id)
            .cloned()
            .collect())
    }

    pub fn credit(
        &self,
        wallet_id: i64,
        amount: Decimal,
        description: impl Into<String>,
        order_id: Option<i64>,
        payment: Option<PaymentMeta>,
    ) -> Result<(Wallet, Transaction), AppError> {
        ensure_positive(amount)?;

        let mut book = self.book.lock();
        book.credit(
            wallet_id,
            amount,
            description.into(),
            order_id,
            payment,
            Utc::now(),
        )
    }

    /// Appends a pending debit. The balance is not touched until review.
    pub fn request_withdrawal(
        &self,
        wallet_id: i64,
        amount: Decimal,
        description: Option<String>,
        payment: Option<PaymentMeta>,
    ) -> Result<Transaction, AppError> {
        ensure_positive(amount)?;

        let mut book = self.book.lock();
        let now = Utc::now();
        let balance = book.wallet_mut(wallet_id)?.balance;
        if amount > balance {
            return Err(AppError::InsufficientBalance {
                requested: amount,
                available: balance,
            });
        }

        Ok(book.append(
            wallet_id,
            amount,
            TransactionType::Debit,
            TransactionStatus::Pending,
            description.unwrap_or_else(|| "Withdrawal request".to_string()),
            None,
            payment,
            now,
        ))
    }

    pub fn review_withdrawal(
        &self,
        transaction_id: i64,
        decision: WithdrawalDecision,
    ) -> Result<(Wallet, Transaction), AppError> {
        let mut book = self.book.lock();
        let now = Utc::now();

        let (wallet_id, amount) = {
            let transaction = book.transactions.get(&transaction_id).ok_or_else(|| {
                AppError::NotFound(format!("transaction {transaction_id} not found"))
            })?;
            if transaction.kind != TransactionType::Debit {
                return Err(AppError::NotFound(format!(
                    "transaction {transaction_id} is not a withdrawal"
                )));
            }
            if transaction.status != TransactionStatus::Pending {
                return Err(AppError::AlreadyProcessed(transaction_id));
            }
            (transaction.wallet_id, transaction.amount)
        };

        let wallet = book.wallet_mut(wallet_id)?;
        let status = match decision {
            WithdrawalDecision::Approved => {
                // The balance may have moved since the request was made.
                if wallet.balance < amount {
                    return Err(AppError::InsufficientBalance {
                        requested: amount,
                        available: wallet.balance,
                    });
                }
                wallet.balance -= amount;
                wallet.updated_at = now;
                TransactionStatus::Completed
            }
            WithdrawalDecision::Rejected => TransactionStatus::Rejected,
        };
        let wallet = wallet.clone();

        let transaction = book
            .transactions
            .get_mut(&transaction_id)
            .ok_or_else(|| AppError::Internal(format!("transaction {transaction_id} vanished")))?;
        transaction.status = status;
        transaction.updated_at = now;

        Ok((wallet, transaction.clone()))
    }

    /// Credits the courier's net earnings and, when present, the referral reward
    /// in one critical section.
    pub fn settle_delivery(
        &self,
        settlement: &DeliverySettlement,
    ) -> Result<SettlementReceipt, AppError> {
        if settlement.courier_net < Decimal::ZERO {
            return Err(AppError::Internal(format!(
                "negative courier earnings for order {}",
                settlement.order_id
            )));
        }
        if let Some(referral) = &settlement.referral {
            ensure_positive(referral.amount)?;
        }

        let mut book = self.book.lock();
        let now = Utc::now();

        let courier_wallet_id = book.wallet_id_for(settlement.courier_id, Role::Courier, now);
        let (courier_wallet, courier_credit) = if settlement.courier_net > Decimal::ZERO {
            let (wallet, transaction) = book.credit(
                courier_wallet_id,
                settlement.courier_net,
                format!("Delivery earning for order {}", settlement.order_code),
                Some(settlement.order_id),
                None,
                now,
            )?;
            (wallet, Some(transaction))
        } else {
            (book.wallet_mut(courier_wallet_id)?.clone(), None)
        };

        let referral = match &settlement.referral {
            Some(reward) => {
                let wallet_id = book.wallet_id_for(reward.referrer_id, reward.referrer_role, now);
                Some(book.credit(
                    wallet_id,
                    reward.amount,
                    format!("Referral reward for inviting {}", reward.referee_name),
                    Some(settlement.order_id),
                    None,
                    now,
                )?)
            }
            None => None,
        };

        Ok(SettlementReceipt {
            courier_wallet,
            courier_credit,
            referral,
        })
    }

    /// Σ completed credits − Σ completed debits, recomputed from the log.
    pub fn reconciled_balance(&self, wallet_id: i64) -> Result<Decimal, AppError> {
        let book = self.book.lock();
        if !book.wallets.contains_key(&wallet_id) {
            return Err(AppError::NotFound(format!("wallet {wallet_id} not found")));
        }

        Ok(book
            .transactions
            .values()
            .filter(|transaction| {
                transaction.wallet_id == wallet_id
                    && transaction.status == TransactionStatus::Completed
            })
            .fold(Decimal::ZERO, |total, transaction| match transaction.kind {
                TransactionType::Credit => total + transaction.amount,
                TransactionType::Debit => total - transaction.amount,
            }))
    }
}

fn ensure_positive(amount: Decimal) -> Result<(), AppError> {
    if amount <= Decimal::ZERO {
        return Err(AppError::Validation(format!(
            "amount must be positive, got {amount}"
        )));
    }
    Ok(())
}
