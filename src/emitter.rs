use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use crate::{
    consumer::{ConsumerId, ConsumerSet, GlobalSubscription, NextEvent, Subscription},
    error::LimitExceeded,
    event::{Event, EventName, EventPayload},
    listener::{Callback, GlobalCallback, ListenerId, ListenerSet},
};

/// Лимит регистраций на одно имя события по умолчанию.
pub const DEFAULT_MAX_LISTENERS: usize = 10;

/// Ёмкость канала каждого pull-потребителя по умолчанию.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 16;

/// Конфигурация эмиттера.
#[derive(Debug, Clone, Copy)]
pub struct EmitterConfig {
    /// Лимит регистраций на одно имя события; `0` снимает лимит.
    ///
    /// Считается независимо для слушателей имени, глобальных слушателей,
    /// потребителей имени и глобальных потребителей.
    pub max_listeners_per_event: usize,
    /// Ёмкость канала каждого pull-потребителя (минимум 1).
    ///
    /// Заполненный канал приостанавливает `emit` до тех пор, пока
    /// читатель не заберёт элемент.
    pub channel_capacity: usize,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            max_listeners_per_event: DEFAULT_MAX_LISTENERS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Эмиттер строго типизированных событий.
///
/// Поддерживает:
/// - Синхронные слушатели по имени события и глобальные (на все имена)
/// - Pull-подписки: асинхронные последовательности по имени и по всем именам
/// - One-shot регистрации обеих моделей (`once`, `wait_for`)
/// - Адресное и массовое снятие регистраций с корректным завершением
///   подписок
///
/// Порядок доставки внутри одного `emit`: слушатели имени, затем
/// глобальные слушатели (строго в порядке регистрации, до любой
/// pull-доставки), затем потребители имени, затем глобальные потребители.
///
/// Весь реестр принадлежит одному экземпляру; общего состояния между
/// экземплярами нет.
pub struct Emitter<N, P> {
    /// Синхронные слушатели.
    listeners: Mutex<ListenerSet<N, P>>,
    /// Pull-потребители.
    consumers: Mutex<ConsumerSet<N, P>>,
    /// Лимит регистраций (0 — без лимита).
    max_per_event: usize,
    /// Ёмкость канала потребителя.
    channel_capacity: usize,
    /// Счётчик для выдачи токенов регистраций.
    next_id: AtomicU64,
    /// Общее количество вызовов `emit`.
    pub emit_count: AtomicUsize,
    /// Количество доставок, упавших в канал с брошенным читателем.
    pub closed_send_count: AtomicUsize,
}

impl<N: EventName, P: EventPayload> Emitter<N, P> {
    /// Создаёт эмиттер с настройками по умолчанию.
    pub fn new() -> Self {
        Self::with_config(EmitterConfig::default())
    }

    /// Создаёт эмиттер с заданным лимитом регистраций; `0` снимает лимит.
    pub fn with_max_listeners(max_listeners_per_event: usize) -> Self {
        Self::with_config(EmitterConfig {
            max_listeners_per_event,
            ..EmitterConfig::default()
        })
    }

    /// Создаёт эмиттер с полной конфигурацией.
    pub fn with_config(config: EmitterConfig) -> Self {
        Self {
            listeners: Mutex::new(ListenerSet::new()),
            consumers: Mutex::new(ConsumerSet::new()),
            max_per_event: config.max_listeners_per_event,
            channel_capacity: config.channel_capacity.max(1),
            next_id: AtomicU64::new(0),
            emit_count: AtomicUsize::new(0),
            closed_send_count: AtomicUsize::new(0),
        }
    }

    fn alloc_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    ////////////////////////////////////////////////////////////////////////
    // Регистрация
    ////////////////////////////////////////////////////////////////////////

    /// Регистрирует постоянного слушателя имени `name`.
    ///
    /// # Возвращает
    /// - `Ok(ListenerId)` — токен для адресного снятия
    /// - `Err(LimitExceeded)`, если список имени уже достиг лимита
    pub fn on(
        &self,
        name: N,
        callback: impl FnMut(&P) + Send + 'static,
    ) -> Result<ListenerId, LimitExceeded> {
        self.add_listener(name, Box::new(callback), false)
    }

    /// Регистрирует one-shot слушателя имени `name`: будет вызван не более
    /// одного раза за время жизни эмиттера и снят сразу после вызова.
    pub fn once(
        &self,
        name: N,
        callback: impl FnMut(&P) + Send + 'static,
    ) -> Result<ListenerId, LimitExceeded> {
        self.add_listener(name, Box::new(callback), true)
    }

    /// Регистрирует постоянного глобального слушателя: вызывается на каждую
    /// эмиссию любого имени с парой `(имя, нагрузка)`.
    pub fn on_any(
        &self,
        callback: impl FnMut(&N, &P) + Send + 'static,
    ) -> Result<ListenerId, LimitExceeded> {
        self.add_global_listener(Box::new(callback), false)
    }

    /// Регистрирует one-shot глобального слушателя.
    pub fn once_any(
        &self,
        callback: impl FnMut(&N, &P) + Send + 'static,
    ) -> Result<ListenerId, LimitExceeded> {
        self.add_global_listener(Box::new(callback), true)
    }

    fn add_listener(
        &self,
        name: N,
        callback: Callback<P>,
        once: bool,
    ) -> Result<ListenerId, LimitExceeded> {
        let id = ListenerId(self.alloc_id());
        self.listeners
            .lock()
            .register(name, callback, once, id, self.max_per_event)?;
        Ok(id)
    }

    fn add_global_listener(
        &self,
        callback: GlobalCallback<N, P>,
        once: bool,
    ) -> Result<ListenerId, LimitExceeded> {
        let id = ListenerId(self.alloc_id());
        self.listeners
            .lock()
            .register_global(callback, once, id, self.max_per_event)?;
        Ok(id)
    }

    /// Создаёт pull-подписку на имя `name`.
    ///
    /// Подписка получает каждую эмиссию этого имени начиная с момента
    /// создания; прошлые эмиссии не доигрываются.
    pub fn subscribe(&self, name: N) -> Result<Subscription<P>, LimitExceeded> {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let id = ConsumerId(self.alloc_id());
        self.consumers
            .lock()
            .add(name, tx, id, self.max_per_event)?;
        Ok(Subscription { rx })
    }

    /// Создаёт pull-подписку на все события эмиттера.
    pub fn subscribe_all(&self) -> Result<GlobalSubscription<N, P>, LimitExceeded> {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let id = ConsumerId(self.alloc_id());
        self.consumers
            .lock()
            .add_global(tx, id, self.max_per_event)?;
        Ok(GlobalSubscription { rx })
    }

    /// Возвращает future следующей эмиссии имени `name`.
    ///
    /// Реализовано поверх внутреннего one-shot слушателя, поэтому подчиняется
    /// тому же лимиту и снимается теми же операциями (`remove_listener` по
    /// [`NextEvent::id`], `off`, `off_all`); снятый до эмиссии future
    /// разрешается в `None`.
    pub fn wait_for(&self, name: N) -> Result<NextEvent<P>, LimitExceeded> {
        let (tx, rx) = oneshot::channel();
        let mut tx = Some(tx);
        let id = self.once(name, move |payload: &P| {
            if let Some(tx) = tx.take() {
                let _ = tx.send(payload.clone());
            }
        })?;
        Ok(NextEvent { id, rx })
    }

    ////////////////////////////////////////////////////////////////////////
    // Диспетчеризация
    ////////////////////////////////////////////////////////////////////////

    /// Эмитирует событие `name` с нагрузкой `payload`.
    ///
    /// Порядок одного вызова:
    /// 1. Снимок списков слушателей. Слушатели, добавленные или снятые
    ///    side-эффектами вызываемых в этом же проходе callbacks, на сам
    ///    проход не влияют.
    /// 2. Вызов слушателей имени в порядке регистрации; one-shot запись
    ///    снимается из живого реестра сразу после возврата её callback.
    /// 3. Вызов глобальных слушателей с парой `(имя, нагрузка)`, те же
    ///    правила.
    /// 4. Последовательная запись нагрузки каждому текущему потребителю
    ///    имени; каждая запись ожидается до перехода к следующей.
    /// 5. То же для глобальных потребителей с парой [`Event`].
    ///
    /// Возврат — только после завершения всех пяти шагов. Заполненный канал
    /// потребителя приостанавливает вызов до вычитки (backpressure); один
    /// медленный потребитель задерживает доставку последующим в том же
    /// вызове. Записи с брошенной читающей стороной выбраковываются.
    pub async fn emit(&self, name: N, payload: P) {
        self.emit_count.fetch_add(1, Ordering::Relaxed);
        trace!("emit {:?}", name);

        let (named, global) = {
            let listeners = self.listeners.lock();
            (listeners.snapshot(&name), listeners.snapshot_global())
        };

        for entry in named {
            if !entry.claim() {
                continue;
            }
            {
                let mut callback = entry.callback.lock();
                (*callback)(&payload);
            }
            if entry.once {
                self.listeners.lock().remove_entry(&name, entry.id);
            }
        }

        for entry in global {
            if !entry.claim() {
                continue;
            }
            {
                let mut callback = entry.callback.lock();
                (*callback)(&name, &payload);
            }
            if entry.once {
                self.listeners.lock().remove_global_entry(entry.id);
            }
        }

        // Потребители читаются заново после слушателей: снятые ими
        // подписки уже не получат эту эмиссию.
        let targets = self.consumers.lock().senders(&name);
        let mut dead = Vec::new();
        for (id, tx) in targets {
            if tx.send(payload.clone()).await.is_err() {
                self.closed_send_count.fetch_add(1, Ordering::Relaxed);
                dead.push(id);
            }
        }
        if !dead.is_empty() {
            debug!("pruning {} abandoned consumers of {:?}", dead.len(), name);
            self.consumers.lock().prune(&name, &dead);
        }

        let targets = self.consumers.lock().global_senders();
        let mut dead = Vec::new();
        for (id, tx) in targets {
            let event = Event::new(name.clone(), payload.clone());
            if tx.send(event).await.is_err() {
                self.closed_send_count.fetch_add(1, Ordering::Relaxed);
                dead.push(id);
            }
        }
        if !dead.is_empty() {
            debug!("pruning {} abandoned global consumers", dead.len());
            self.consumers.lock().prune_global(&dead);
        }
    }

    ////////////////////////////////////////////////////////////////////////
    // Снятие регистраций
    ////////////////////////////////////////////////////////////////////////

    /// Снимает слушателя по токену, где бы он ни был зарегистрирован.
    /// Потребителей не трогает.
    ///
    /// # Возвращает
    /// - `true`, если регистрация была найдена и снята.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.lock().remove(id)
    }

    /// Снимает все регистрации имени `name`: слушатели удаляются,
    /// потребители закрываются.
    ///
    /// Закрытие мягкое: уже буферизованные нагрузки остаются читаемыми,
    /// после них читатель наблюдает конец последовательности. Ожидающий
    /// `recv` будится концом последовательности, не ошибкой. Глобальные
    /// регистрации и другие имена не затрагиваются.
    pub fn off(&self, name: &N) {
        debug!("off {:?}", name);
        self.listeners.lock().remove_name(name);
        self.consumers.lock().close_name(name);
    }

    /// Полный сброс: снимает все слушатели (включая глобальные) и мягко
    /// закрывает всех потребителей (включая глобальных). Эмиттер
    /// возвращается к состоянию сразу после создания, конфигурация и
    /// счётчики сохраняются.
    pub fn off_all(&self) {
        debug!("off_all");
        self.listeners.lock().clear();
        self.consumers.lock().close_all();
    }

    ////////////////////////////////////////////////////////////////////////
    // Интроспекция
    ////////////////////////////////////////////////////////////////////////

    /// Количество слушателей имени `name`.
    pub fn listener_count(&self, name: &N) -> usize {
        self.listeners.lock().count(name)
    }

    /// Количество глобальных слушателей.
    pub fn global_listener_count(&self) -> usize {
        self.listeners.lock().global_count()
    }

    /// Количество потребителей имени `name`.
    pub fn consumer_count(&self, name: &N) -> usize {
        self.consumers.lock().count(name)
    }

    /// Количество глобальных потребителей.
    pub fn global_consumer_count(&self) -> usize {
        self.consumers.lock().global_count()
    }
}

impl<N: EventName, P: EventPayload> Default for Emitter<N, P> {
    fn default() -> Self {
        Self::new()
    }
}
